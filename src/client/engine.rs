//! Session orchestrator.
//!
//! An [`Engine`] owns one active transport at a time and drives it through
//! handshake, upgrade, keep-alive and teardown:
//!
//! ```text
//! start()
//!   │  connect            handshake, session negotiated
//!   │  standby            I/O stopped, session kept
//!   │  connect (resume)   offered upgrade if registered, else same kind
//!   ▼
//! receiving ── "open", queued events, live events ──► application
//!   │
//!   ▼  close (peer, stop() or fatal failure)
//! detach, stop keep-alive, "close"
//! ```
//!
//! Events received before the final transport is receiving are queued and
//! delivered in arrival order right after `open`.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::ClientConfig;
use crate::core::{Error, SessionContext, StateError};
use crate::dispatch::{BoxError, Callback, Dispatcher, Reply};
use crate::transport::{
    Completion, PacketData, PacketEvent, PacketType, PollingTransportFactory, Transport,
    TransportError, TransportFactory, TransportState,
};

/// Events an engine dispatches to the application.
pub const ENGINE_EVENTS: [&str; 7] = ["open", "close", "ping", "pong", "message", "upgrade", "noop"];

/// Transport events relayed to the application. `close` is handled apart.
const RELAYED: [PacketType; 5] = [
    PacketType::Ping,
    PacketType::Pong,
    PacketType::Message,
    PacketType::Upgrade,
    PacketType::Noop,
];

type Queued = Vec<(String, PacketEvent)>;

/// Forwards the events of one transport to the engine.
struct Relay {
    engine: Weak<Inner>,
    transport: Weak<dyn Transport>,
    /// `Some` while events are queued rather than delivered.
    pending: Mutex<Option<Queued>>,
}

impl Relay {
    fn relay(&self, event: &str, data: &PacketEvent) -> Result<Reply, BoxError> {
        let Some(engine) = self.engine.upgrade() else {
            return Ok(Reply::Done);
        };

        // Server pings are answered before anyone sees them.
        let reply = if event == PacketType::Ping.name() {
            self.pong(data)
        } else {
            Reply::Done
        };

        if let Some(queue) = self.pending.lock().as_mut() {
            queue.push((event.to_string(), data.clone()));
            return Ok(reply);
        }
        engine.events.dispatch(event, data);
        Ok(reply)
    }

    fn pong(&self, data: &PacketEvent) -> Reply {
        let Some(transport) = self.transport.upgrade() else {
            return Reply::Done;
        };
        match transport.send_packet(PacketType::Pong, data.clone()) {
            Ok(sent) => Reply::Deferred(Box::pin(async move {
                match sent.await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_expected() => {
                        debug!(error = %e, "pong not delivered (ignored)");
                        Ok(())
                    }
                    Err(e) => Err(BoxError::from(e)),
                }
            })),
            Err(e) => {
                debug!(error = %e, "cannot answer ping");
                Reply::Done
            }
        }
    }

    fn closed(self: &Arc<Self>) -> Reply {
        let Some(engine) = self.engine.upgrade() else {
            return Reply::Done;
        };
        match engine.detach_closed(self) {
            Some(active) => Reply::Deferred(Box::pin(engine.finish(active))),
            None => {
                debug!("close from a detached transport");
                Reply::Done
            }
        }
    }

    /// Stop queueing and hand back what was queued.
    fn take_pending(&self) -> Queued {
        self.pending.lock().take().unwrap_or_default()
    }

    /// Deliver queued events in arrival order, then switch to live delivery.
    ///
    /// Events arriving while a batch is delivered are queued behind it.
    fn flush(&self, events: &Dispatcher<PacketEvent>) {
        loop {
            let batch = {
                let mut pending = self.pending.lock();
                match pending.as_mut() {
                    Some(queue) if !queue.is_empty() => std::mem::take(queue),
                    _ => {
                        *pending = None;
                        return;
                    }
                }
            };
            for (event, data) in batch {
                events.dispatch(&event, &data);
            }
        }
    }
}

/// One transport and the engine's subscriptions on it.
struct Attachment {
    transport: Arc<dyn Transport>,
    relay: Arc<Relay>,
    subscriptions: Vec<(&'static str, Callback<PacketEvent>)>,
}

impl Attachment {
    /// Subscribe to `transport`, queueing events behind `pending`.
    fn attach(engine: &Arc<Inner>, transport: Arc<dyn Transport>, pending: Queued) -> Self {
        let relay = Arc::new(Relay {
            engine: Arc::downgrade(engine),
            transport: Arc::downgrade(&transport),
            pending: Mutex::new(Some(pending)),
        });

        let mut subscriptions = Vec::with_capacity(RELAYED.len() + 1);
        for packet_type in RELAYED {
            let r = Arc::clone(&relay);
            let callback: Callback<PacketEvent> =
                Arc::new(move |event: &str, data: &PacketEvent| r.relay(event, data));
            subscriptions.push((packet_type.name(), callback));
        }
        let r = Arc::clone(&relay);
        let on_close: Callback<PacketEvent> =
            Arc::new(move |_: &str, _: &PacketEvent| Ok::<_, BoxError>(r.closed()));
        subscriptions.push((PacketType::Close.name(), on_close));

        subscriptions.retain(|(event, callback)| {
            transport.events().on(event, Arc::clone(callback))
        });

        Self {
            transport,
            relay,
            subscriptions,
        }
    }

    fn detach(&self) {
        for (event, callback) in &self.subscriptions {
            self.transport.events().unregister(event, callback, false);
        }
    }
}

/// Periodic client pings.
struct Keepalive {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Keepalive {
    fn spawn(transport: Arc<dyn Transport>, context: Arc<SessionContext>) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(keepalive(transport, context, cancel.clone()));
        Self { cancel, handle }
    }

    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                warn!("keep-alive task panicked");
            }
        }
    }
}

async fn keepalive(
    transport: Arc<dyn Transport>,
    context: Arc<SessionContext>,
    cancel: CancellationToken,
) {
    while let Some(interval) = context.ping_interval() {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        if transport.state() != TransportState::Receiving {
            break;
        }

        let sent = match transport.send_packet(PacketType::Ping, None) {
            Ok(sent) => sent,
            Err(e) => {
                debug!(error = %e, "keep-alive cannot send");
                break;
            }
        };
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = sent => result,
        };

        match result {
            Ok(()) => debug!("keep-alive ping sent"),
            Err(e) if e.is_expected() => debug!(error = %e, "keep-alive ping failed (ignored)"),
            Err(e) => {
                error!(error = %e, "keep-alive ping failed");
                break;
            }
        }
    }
    debug!("keep-alive stopped");
}

struct Active {
    attachment: Attachment,
    keepalive: Option<Keepalive>,
    stopping: bool,
}

struct Inner {
    config: ClientConfig,
    default_transport: Arc<dyn TransportFactory>,
    transports: Vec<Arc<dyn TransportFactory>>,
    events: Dispatcher<PacketEvent>,
    context: Arc<SessionContext>,
    active: Mutex<Option<Active>>,
}

/// Client session engine.
///
/// Cloning yields another handle to the same engine. Operations spawn their
/// work and must be called from within a tokio runtime.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("base_url", &self.inner.config.base_url.as_str())
            .field("running", &self.running())
            .field("session_id", &self.session_id())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine speaking HTTP long-polling.
    pub fn new(config: ClientConfig) -> Self {
        let polling: Arc<dyn TransportFactory> = Arc::new(PollingTransportFactory);
        Self::build(config, Arc::clone(&polling), vec![polling])
    }

    /// Create an engine with several transport kinds.
    ///
    /// The first one carries the handshake; the others are upgrade targets
    /// when the server offers them.
    pub fn with_transports(
        config: ClientConfig,
        transports: Vec<Arc<dyn TransportFactory>>,
    ) -> Result<Self, Error> {
        let default = transports
            .first()
            .cloned()
            .ok_or_else(|| Error::Config("at least one transport is required".into()))?;
        Ok(Self::build(config, default, transports))
    }

    fn build(
        config: ClientConfig,
        default_transport: Arc<dyn TransportFactory>,
        transports: Vec<Arc<dyn TransportFactory>>,
    ) -> Self {
        let context = Arc::new(SessionContext::new(config.base_url.clone()));
        Self {
            inner: Arc::new(Inner {
                config,
                default_transport,
                transports,
                events: Dispatcher::with_events(ENGINE_EVENTS),
                context,
                active: Mutex::new(None),
            }),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Dispatcher of [`ENGINE_EVENTS`].
    pub fn events(&self) -> &Dispatcher<PacketEvent> {
        &self.inner.events
    }

    /// Context shared with the active transport.
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.inner.context
    }

    /// Current session id, if a session exists.
    pub fn session_id(&self) -> Option<String> {
        self.inner.context.session_id()
    }

    /// Check if the active transport is receiving.
    pub fn running(&self) -> bool {
        self.inner
            .active
            .lock()
            .as_ref()
            .is_some_and(|active| active.attachment.transport.state() == TransportState::Receiving)
    }

    /// Name of the active transport.
    pub fn transport_name(&self) -> Option<&'static str> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|active| active.attachment.transport.name())
    }

    /// Open a session.
    ///
    /// The completion settles once the session is receiving and `open` has
    /// been dispatched, or with the failure that prevented it. A server that
    /// closes the session in its handshake answer fails the start with
    /// [`TransportError::Closed`]; `close` is still dispatched, `open` never.
    pub fn start(&self) -> Result<Completion<()>, StateError> {
        let (transport, relay) = {
            let mut active = self.inner.active.lock();
            if active.is_some() {
                return Err(StateError::AlreadyStarted);
            }
            let transport = self.inner.default_transport.build(&self.inner.config.transport);
            let attachment = Attachment::attach(&self.inner, Arc::clone(&transport), Vec::new());
            let relay = Arc::clone(&attachment.relay);
            *active = Some(Active {
                attachment,
                keepalive: None,
                stopping: false,
            });
            (transport, relay)
        };

        info!(url = %self.inner.config.base_url, transport = transport.name(), "engine starting");
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run(transport, relay).await });
        Ok(Box::pin(async move {
            match handle.await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Cancelled),
            }
        }))
    }

    /// End the session.
    ///
    /// The completion settles once `close` has been dispatched.
    pub fn stop(&self) -> Result<Completion<()>, StateError> {
        let (disconnected, closed) = {
            let mut guard = self.inner.active.lock();
            let active = guard.as_mut().ok_or(StateError::NotRunning)?;
            if active.stopping {
                return Err(StateError::StopInFlight);
            }
            let disconnected = active.attachment.transport.disconnect()?;
            active.stopping = true;
            // Registered while the lock is held, so before `close` can fire.
            (disconnected, self.inner.events.future_on("close"))
        };

        info!("engine stopping");
        Ok(Box::pin(async move {
            disconnected.await?;
            if let Some(closed) = closed {
                let _ = closed.await;
            }
            Ok::<(), TransportError>(())
        }))
    }

    /// Send one packet on the active transport.
    pub fn send_packet(
        &self,
        packet_type: PacketType,
        data: Option<PacketData>,
    ) -> Result<Completion<()>, StateError> {
        let guard = self.inner.active.lock();
        let active = guard.as_ref().ok_or(StateError::NotRunning)?;
        active.attachment.transport.send_packet(packet_type, data)
    }
}

impl Inner {
    async fn run(
        self: Arc<Self>,
        transport: Arc<dyn Transport>,
        relay: Arc<Relay>,
    ) -> Result<(), TransportError> {
        let result = self.bring_up(transport, relay).await;
        match &result {
            // The session already ended on its own and `close` follows.
            Err(TransportError::Closed) => warn!("engine start failed: session closed while opening"),
            Err(e) => {
                warn!(error = %e, "engine start failed");
                self.abandon();
            }
            Ok(()) => {}
        }
        result
    }

    async fn bring_up(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        relay: Arc<Relay>,
    ) -> Result<(), TransportError> {
        transport.connect(Arc::clone(&self.context))?.await?;
        if transport.state() != TransportState::Connected {
            // Closed by a packet in the handshake response.
            return Err(TransportError::Closed);
        }
        transport.standby()?.await?;

        let (transport, relay) = match self.upgrade_target(transport.name()) {
            Some(factory) => self.swap(&relay, factory.build(&self.config.transport))?,
            None => (transport, relay),
        };
        transport.connect(Arc::clone(&self.context))?.await?;

        {
            let mut guard = self.active.lock();
            let active = guard
                .as_mut()
                .filter(|active| Arc::ptr_eq(&active.attachment.relay, &relay))
                .ok_or(TransportError::Closed)?;
            active.keepalive = Some(Keepalive::spawn(
                Arc::clone(&transport),
                Arc::clone(&self.context),
            ));
        }

        info!(
            session_id = %self.context.session_id().unwrap_or_default(),
            transport = transport.name(),
            "engine open"
        );
        self.events.dispatch("open", &None);
        relay.flush(&self.events);
        Ok(())
    }

    /// Factory of an upgrade the server offers, other than `current`.
    fn upgrade_target(&self, current: &str) -> Option<Arc<dyn TransportFactory>> {
        if !self.config.upgrades_enabled {
            return None;
        }
        let offered = self.context.upgrades();
        self.transports
            .iter()
            .find(|factory| {
                factory.name() != current && offered.iter().any(|name| name == factory.name())
            })
            .cloned()
    }

    /// Make `next` the active transport, carrying queued events over.
    fn swap(
        self: &Arc<Self>,
        relay: &Arc<Relay>,
        next: Arc<dyn Transport>,
    ) -> Result<(Arc<dyn Transport>, Arc<Relay>), TransportError> {
        let mut guard = self.active.lock();
        let active = guard
            .as_mut()
            .filter(|active| Arc::ptr_eq(&active.attachment.relay, relay))
            .ok_or(TransportError::Closed)?;

        let pending = active.attachment.relay.take_pending();
        let attachment = Attachment::attach(self, Arc::clone(&next), pending);
        let relay = Arc::clone(&attachment.relay);
        let previous = std::mem::replace(&mut active.attachment, attachment);
        previous.detach();

        info!(from = previous.transport.name(), to = next.name(), "transport upgraded");
        Ok((next, relay))
    }

    /// Release whatever a failed start left behind.
    fn abandon(&self) {
        let mut guard = self.active.lock();
        let Some(state) = guard
            .as_ref()
            .map(|active| active.attachment.transport.state())
        else {
            return;
        };

        match state {
            // The session exists: end it, `close` follows.
            TransportState::Connected | TransportState::Receiving => {
                if let Some(active) = guard.as_ref() {
                    if let Err(e) = active.attachment.transport.disconnect() {
                        debug!(error = %e, "abandoned transport already stopping");
                    }
                }
            }
            // A real teardown is under way and ends with `close`.
            TransportState::Disconnecting => {}
            TransportState::Connecting | TransportState::Disconnected => {
                if let Some(active) = guard.take() {
                    active.attachment.detach();
                }
            }
        }
    }

    /// Remove the active transport if `relay` belongs to it.
    fn detach_closed(&self, relay: &Arc<Relay>) -> Option<Active> {
        let mut guard = self.active.lock();
        if guard
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(&active.attachment.relay, relay))
        {
            guard.take()
        } else {
            None
        }
    }

    /// Close sequencing: nothing from the transport or the keep-alive is
    /// observable once `close` fires.
    async fn finish(self: Arc<Self>, active: Active) -> Result<(), BoxError> {
        let Active {
            attachment,
            keepalive,
            ..
        } = active;

        attachment.detach();
        if let Some(keepalive) = keepalive {
            keepalive.stop().await;
        }

        let dropped = attachment.relay.take_pending().len();
        if dropped > 0 {
            debug!(dropped, "events queued before open discarded");
        }

        info!(transport = attachment.transport.name(), "engine closed");
        self.events.dispatch("close", &None);
        Ok(())
    }
}
