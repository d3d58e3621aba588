//! HTTP long-polling transport.
//!
//! One connect/teardown cycle owns:
//!
//! - an HTTP client keeping at most `max_connections` idle connections,
//!   routed to a local socket for `unix://` endpoints,
//! - `max_connections - 1` (at least one) send workers pulling from a shared
//!   queue and POSTing one packet each,
//! - while `receiving`, one receive loop issuing GETs back to back,
//! - a cancellation token reaching every request of the cycle.
//!
//! The worker count, not the client pool, bounds concurrent requests.
//!
//! Teardown cancels the token, joins every task and drops the client before
//! the transport reports `disconnected`.

mod receive;
mod request;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder, Method};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use self::receive::{ReceiveStep, dispatch_batch, parse_handshake};
use self::request::{check_acknowledgement, check_status, request_url};
use super::config::TransportConfig;
use super::endpoint::Endpoint;
use super::error::TransportError;
use super::packet::{PacketData, PacketType, encode_packet};
use super::payload::encode_payload;
use super::state::{StateCell, TransportState};
use super::traits::{Completion, PacketEvent, Transport, TransportFactory};
use crate::core::constants::{self, TRANSPORT_POLLING};
use crate::core::{SessionContext, StateError};
use crate::dispatch::Dispatcher;
use crate::retry::{FailureClassifier, RetryDecision, Retrying, timeout_or};

use TransportState::{Connected, Connecting, Disconnected, Disconnecting, Receiving};

/// Events a polling transport dispatches.
const EVENTS: [&str; 6] = ["close", "ping", "pong", "message", "upgrade", "noop"];

type Queue = Arc<AsyncMutex<mpsc::UnboundedReceiver<Outbound>>>;

/// Retry classifier for handshake and close requests.
///
/// A cancellation or a definite answer from the server ends the attempts.
#[derive(Debug, Clone, Copy, Default)]
struct RequestClassifier;

impl FailureClassifier<TransportError> for RequestClassifier {
    fn classify(&self, error: TransportError) -> RetryDecision<TransportError> {
        if error.is_cancellation() || error.is_server_error() {
            RetryDecision::Abort(error)
        } else {
            RetryDecision::Retry(error)
        }
    }
}

/// One queued packet and the sender of its completion.
struct Outbound {
    frame: PacketData,
    done: oneshot::Sender<Result<(), TransportError>>,
}

/// What every request of one cycle needs.
#[derive(Debug, Clone)]
struct Link {
    client: Client,
    url: Url,
    context: Arc<SessionContext>,
    cancel: CancellationToken,
}

/// Resources of one connect/teardown cycle.
struct Cycle {
    link: Link,
    queue: Option<mpsc::UnboundedSender<Outbound>>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    config: TransportConfig,
    state: StateCell,
    events: Dispatcher<PacketEvent>,
    requests: AtomicU64,
    cycle: Mutex<Option<Cycle>>,
}

/// Transport over repeated HTTP requests.
///
/// Operations spawn their work and must be called from within a tokio
/// runtime.
pub struct PollingTransport {
    inner: Arc<Inner>,
}

impl fmt::Debug for PollingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingTransport")
            .field("state", &self.inner.state.get())
            .field("requests", &self.inner.requests.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for PollingTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl PollingTransport {
    /// Create a disconnected transport.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: StateCell::new(),
                events: Dispatcher::with_events(EVENTS),
                requests: AtomicU64::new(0),
                cycle: Mutex::new(None),
            }),
        }
    }

    /// Number of requests issued so far.
    pub fn requests(&self) -> u64 {
        self.inner.requests.load(Ordering::SeqCst)
    }
}

impl Transport for PollingTransport {
    fn name(&self) -> &'static str {
        TRANSPORT_POLLING
    }

    fn state(&self) -> TransportState {
        self.inner.state.get()
    }

    fn events(&self) -> &Dispatcher<PacketEvent> {
        &self.inner.events
    }

    fn connect(&self, context: Arc<SessionContext>) -> Result<Completion<()>, StateError> {
        self.inner
            .state
            .transition_from(&[Disconnected], Connecting, "connect")?;

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.connect(context).await });
        Ok(Box::pin(async move {
            match handle.await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Cancelled),
            }
        }))
    }

    fn standby(&self) -> Result<Completion<()>, StateError> {
        Inner::shutdown(&self.inner, false, "standby").map(join_completion)
    }

    fn disconnect(&self) -> Result<Completion<()>, StateError> {
        Inner::shutdown(&self.inner, true, "disconnect").map(join_completion)
    }

    fn send_packet(
        &self,
        packet_type: PacketType,
        data: Option<PacketData>,
    ) -> Result<Completion<()>, StateError> {
        self.inner
            .state
            .require(&[Connected, Receiving], "send packet")?;

        let frame = encode_packet(packet_type, data.as_ref());
        let (done, rx) = oneshot::channel();
        let queued = self
            .inner
            .cycle
            .lock()
            .as_ref()
            .and_then(|cycle| cycle.queue.as_ref())
            .is_some_and(|queue| queue.send(Outbound { frame, done }).is_ok());

        Ok(Box::pin(async move {
            if !queued {
                return Err(TransportError::Closed);
            }
            rx.await.unwrap_or(Err(TransportError::Cancelled))
        }))
    }
}

fn join_completion(handle: JoinHandle<()>) -> Completion<()> {
    Box::pin(async move { handle.await.map_err(|_| TransportError::Cancelled) })
}

impl Inner {
    /// Deadline of one request: the negotiated ping timeout, or the
    /// configured default before a session exists.
    fn deadline(&self, context: &SessionContext) -> Duration {
        context
            .ping_timeout()
            .unwrap_or(self.config.default_timeout)
    }

    /// Deadline of one poll. The server may hold a poll for a full ping
    /// interval before answering it.
    fn poll_deadline(&self, context: &SessionContext) -> Duration {
        self.deadline(context) + context.ping_interval().unwrap_or_default()
    }

    fn open_link(&self, context: Arc<SessionContext>) -> Result<Link, TransportError> {
        let endpoint = Endpoint::resolve(context.base_url())?;
        let url = Endpoint::polling_url(context.base_url())?;

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(constants::ACCEPT));
        headers.insert(
            header::ACCEPT_CHARSET,
            HeaderValue::from_static(constants::ACCEPT_CHARSET),
        );
        // Idle cap only. Concurrency is bounded by the send workers plus the
        // receive loop, which together never exceed `max_connections`.
        let builder = Client::builder()
            .default_headers(headers)
            .pool_max_idle_per_host(self.config.max_connections);
        let client = route(builder, &endpoint)?.build()?;

        Ok(Link {
            client,
            url,
            context,
            cancel: CancellationToken::new(),
        })
    }

    async fn connect(self: Arc<Self>, context: Arc<SessionContext>) -> Result<(), TransportError> {
        let link = match self.open_link(context) {
            Ok(link) => link,
            Err(e) => {
                self.abort_connect().await;
                return Err(e);
            }
        };
        *self.cycle.lock() = Some(Cycle {
            link: link.clone(),
            queue: None,
            tasks: Vec::new(),
        });

        if let Some(session_id) = link.context.session_id() {
            self.state.transition(Receiving)?;
            self.start(&link, true);
            info!(session_id = %session_id, "polling resumed");
            return Ok(());
        }

        let retrying =
            Retrying::new(self.config.handshake_retries).with_classifier(RequestClassifier);
        let handshake = retrying
            .run(|| self.exchange(&link, Method::GET, None, self.deadline(&link.context)))
            .await
            .and_then(|(_, body)| {
                let (session, offset) = parse_handshake(&body)?;
                Ok((session, body, offset))
            });

        let (session, body, offset) = match handshake {
            Ok(handshake) => handshake,
            Err(e) => {
                warn!(error = %e, "handshake failed");
                self.abort_connect().await;
                return Err(e);
            }
        };

        let session_id = session.session_id.clone();
        link.context.set(session);
        self.state.transition(Connected)?;
        self.start(&link, false);
        info!(session_id = %session_id, "polling connected");

        match dispatch_batch(&body[offset..], &link.context, &self.events) {
            Ok(ReceiveStep::Continue) => {}
            Ok(ReceiveStep::PeerClosed) => {
                info!("session closed by peer during handshake");
                let _ = Inner::shutdown(&self, true, "close");
            }
            Err(e) => {
                warn!(error = %e, "malformed handshake response");
                let _ = Inner::shutdown(&self, true, "close");
            }
        }
        Ok(())
    }

    /// Undo a failed connect. No session was established, so no close event.
    async fn abort_connect(&self) {
        if let Err(e) = self.state.transition(Disconnecting) {
            debug!(error = %e, "connect already aborted");
            return;
        }
        self.release().await;
        if let Err(e) = self.state.transition(Disconnected) {
            warn!(error = %e, "abort left transport in unexpected state");
        }
    }

    /// Spawn the send workers and, when `receiving`, the receive loop.
    fn start(self: &Arc<Self>, link: &Link, receiving: bool) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue: Queue = Arc::new(AsyncMutex::new(rx));

        let mut tasks: Vec<JoinHandle<()>> = (0..self.config.send_workers())
            .map(|worker| {
                let inner = Arc::clone(self);
                let link = link.clone();
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { inner.send_worker(worker, link, queue).await })
            })
            .collect();

        if receiving {
            let inner = Arc::clone(self);
            let link = link.clone();
            tasks.push(tokio::spawn(async move { inner.receive_loop(link).await }));
        }

        if let Some(cycle) = self.cycle.lock().as_mut() {
            cycle.queue = Some(tx);
            cycle.tasks.extend(tasks);
        }
    }

    /// Enter `disconnecting` synchronously and finish teardown on a spawned
    /// task.
    fn shutdown(
        this: &Arc<Self>,
        real: bool,
        operation: &'static str,
    ) -> Result<JoinHandle<()>, StateError> {
        this.state
            .transition_from(&[Connected, Receiving], Disconnecting, operation)?;
        let inner = Arc::clone(this);
        Ok(tokio::spawn(async move { inner.teardown(real).await }))
    }

    async fn teardown(&self, real: bool) {
        let link = self.cycle.lock().as_ref().map(|cycle| cycle.link.clone());

        if real {
            if let Some(link) = link.as_ref().filter(|link| link.context.has_session()) {
                self.send_close(link).await;
            }
        }
        let context = link.map(|link| link.context);

        self.release().await;

        if let Err(e) = self.state.transition(Disconnected) {
            warn!(error = %e, "teardown left transport in unexpected state");
        }

        if real {
            if let Some(context) = context {
                context.clear();
            }
            info!("polling closed");
            self.events.dispatch(PacketType::Close.name(), &None);
        }
    }

    /// Cancel every request of the cycle, join its tasks and drop its client.
    async fn release(&self) {
        let Some(cycle) = self.cycle.lock().take() else {
            return;
        };
        let Cycle { link, queue, tasks } = cycle;

        link.cancel.cancel();
        drop(queue);
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!("polling task panicked");
                }
            }
        }
    }

    /// Best-effort close packet. Failures are logged, never surfaced.
    async fn send_close(&self, link: &Link) {
        let frame = encode_packet(PacketType::Close, None);
        let retrying = Retrying::new(self.config.close_retries).with_classifier(RequestClassifier);

        match retrying.run(|| self.post(link, &frame)).await {
            Ok(()) => debug!("close packet sent"),
            Err(e) if e.is_expected() => debug!(error = %e, "close packet not delivered (ignored)"),
            Err(e) => warn!(error = %e, "close packet failed (ignored)"),
        }
    }

    async fn post(&self, link: &Link, frame: &PacketData) -> Result<(), TransportError> {
        let body = encode_payload([frame]);
        let (status, reply) = self
            .exchange(link, Method::POST, Some(body), self.deadline(&link.context))
            .await?;
        check_acknowledgement(status, &reply)
    }

    /// Issue one request, bounded by `deadline` and the cycle's token.
    ///
    /// An unknown-session answer clears the context before it is returned.
    async fn exchange(
        &self,
        link: &Link,
        method: Method,
        body: Option<Vec<u8>>,
        deadline: Duration,
    ) -> Result<(u16, Vec<u8>), TransportError> {
        let request = self.requests.fetch_add(1, Ordering::SeqCst);
        let session_id = link.context.session_id();
        let url = request_url(&link.url, session_id.as_deref(), request);
        debug!(request, %method, "polling request");

        let mut builder = link.client.request(method, url);
        if let Some(body) = body {
            builder = builder
                .header(header::CONTENT_TYPE, constants::CONTENT_TYPE)
                .body(body);
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?.to_vec();
            check_status(status, &body)?;
            Ok::<_, TransportError>((status, body))
        };

        let result = tokio::select! {
            biased;
            () = link.cancel.cancelled() => Err(TransportError::Cancelled),
            result = timeout_or(Some(deadline), exchange, || TransportError::Timeout) => result,
        };

        if let Err(e) = &result {
            if e.is_unknown_session() {
                link.context.clear();
            }
            debug!(request, error = %e, "polling request failed");
        }
        result
    }

    async fn send_worker(self: Arc<Self>, worker: usize, link: Link, queue: Queue) {
        loop {
            let next = {
                let mut queue = queue.lock().await;
                tokio::select! {
                    biased;
                    () = link.cancel.cancelled() => None,
                    next = queue.recv() => next,
                }
            };
            let Some(Outbound { frame, done }) = next else {
                break;
            };

            if !self.state.get().is_active() {
                let _ = done.send(Err(TransportError::Cancelled));
                break;
            }

            // A send overtaken by teardown settles as cancelled, whatever
            // the server made of it.
            let result = match self.post(&link, &frame).await {
                Err(e) if !e.is_cancellation() && !self.state.get().is_active() => {
                    debug!(worker, error = %e, "send interrupted by teardown");
                    Err(TransportError::Cancelled)
                }
                result => result,
            };
            let fatal = match &result {
                Err(e) if !e.is_cancellation() => {
                    warn!(worker, error = %e, "send failed");
                    true
                }
                _ => false,
            };
            let _ = done.send(result);

            if fatal {
                let _ = Inner::shutdown(&self, true, "close");
                break;
            }
        }
        debug!(worker, "send worker stopped");
    }

    async fn receive_loop(self: Arc<Self>, link: Link) {
        while self.state.get() == Receiving && !link.cancel.is_cancelled() {
            let step = match self
                .exchange(&link, Method::GET, None, self.poll_deadline(&link.context))
                .await
            {
                Ok((_, body)) => dispatch_batch(&body, &link.context, &self.events),
                Err(e) => Err(e),
            };

            match step {
                Ok(ReceiveStep::Continue) => {}
                Ok(ReceiveStep::PeerClosed) => {
                    info!("session closed by peer");
                    let _ = Inner::shutdown(&self, true, "close");
                    break;
                }
                Err(e) if e.is_cancellation() => break,
                Err(e) => {
                    if e.is_unknown_session() {
                        info!(error = %e, "session expired");
                    } else {
                        warn!(error = %e, "receive failed");
                    }
                    let _ = Inner::shutdown(&self, true, "close");
                    break;
                }
            }
        }
        debug!("receive loop stopped");
    }
}

/// Builds [`PollingTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollingTransportFactory;

impl TransportFactory for PollingTransportFactory {
    fn name(&self) -> &'static str {
        TRANSPORT_POLLING
    }

    fn build(&self, config: &TransportConfig) -> Arc<dyn Transport> {
        Arc::new(PollingTransport::new(config.clone()))
    }
}

/// Send every request of `builder` to the endpoint's local socket, if any.
#[cfg(unix)]
fn route(builder: ClientBuilder, endpoint: &Endpoint) -> Result<ClientBuilder, TransportError> {
    match endpoint {
        Endpoint::Unix { path } => Ok(builder.unix_socket(path.as_path())),
        Endpoint::Tcp { .. } => Ok(builder),
    }
}

#[cfg(not(unix))]
fn route(builder: ClientBuilder, endpoint: &Endpoint) -> Result<ClientBuilder, TransportError> {
    match endpoint {
        Endpoint::Unix { path } => Err(TransportError::Unsupported(format!(
            "local socket {} on this platform",
            path.display()
        ))),
        Endpoint::Tcp { .. } => Ok(builder),
    }
}
