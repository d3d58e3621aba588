//! In-process polling server shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use parking_lot::Mutex;
use serde_json::json;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tokio::net::{TcpListener, UnixListener};
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;
use url::Url;

use sockio::transport::{PacketData, decode_payload, encode_payload};

/// Answers to one message packet the client sent, as encoded packets.
pub type Responder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

#[derive(Clone)]
pub struct MockOptions {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub upgrades: Vec<String>,
    /// Packets waiting for the first poll of every session.
    pub greeting: Vec<String>,
    /// Packets appended to the handshake answer after the open packet. A
    /// close among them ends the session right away.
    pub handshake_trailer: Vec<String>,
    /// Queue a close packet this long after the handshake.
    pub close_after: Option<Duration>,
    /// How long a poll waits for packets before answering `noop`.
    pub hold: Duration,
    /// Number of handshakes left unanswered until the client gives up.
    pub stall_handshakes: usize,
    /// Status of every handshake answer, when not 200.
    pub handshake_status: Option<StatusCode>,
    /// How long every POST is held before it is acknowledged.
    pub push_delay: Duration,
    pub responder: Option<Responder>,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(5),
            upgrades: Vec::new(),
            greeting: Vec::new(),
            handshake_trailer: Vec::new(),
            close_after: None,
            hold: Duration::from_millis(100),
            stall_handshakes: 0,
            handshake_status: None,
            push_delay: Duration::ZERO,
            responder: None,
        }
    }
}

#[derive(Default)]
struct MockSession {
    outbox: VecDeque<String>,
}

struct Shared {
    options: MockOptions,
    sessions: Mutex<HashMap<String, MockSession>>,
    received: Mutex<Vec<String>>,
    handshakes: AtomicUsize,
    next_sid: AtomicU64,
    pushing: AtomicUsize,
    peak_pushes: AtomicUsize,
}

/// Counts a POST as in flight until dropped.
struct InFlight<'a>(&'a Shared);

impl<'a> InFlight<'a> {
    fn enter(shared: &'a Shared) -> Self {
        let now = shared.pushing.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak_pushes.fetch_max(now, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.pushing.fetch_sub(1, Ordering::SeqCst);
    }
}

type SharedState = State<Arc<Shared>>;
type Params = Query<HashMap<String, String>>;

pub struct MockServer {
    pub url: Url,
    shared: Arc<Shared>,
}

impl MockServer {
    pub async fn start(options: MockOptions) -> Self {
        let (shared, app) = Self::app(options);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: Url::parse(&format!("http://{addr}/engine.io/")).unwrap(),
            shared,
        }
    }

    /// Serve on a fresh local socket; the URL is `unix://<encoded path>/engine.io/`.
    pub async fn start_unix(options: MockOptions) -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let (shared, app) = Self::app(options);

        let path = std::env::temp_dir().join(format!(
            "sockio-{}-{}.sock",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::SeqCst)
        ));
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let encoded = utf8_percent_encode(path.to_str().unwrap(), NON_ALPHANUMERIC);
        Self {
            url: Url::parse(&format!("unix://{encoded}/engine.io/")).unwrap(),
            shared,
        }
    }

    fn app(options: MockOptions) -> (Arc<Shared>, Router) {
        init_tracing();
        let shared = Arc::new(Shared {
            options,
            sessions: Mutex::new(HashMap::new()),
            received: Mutex::new(Vec::new()),
            handshakes: AtomicUsize::new(0),
            next_sid: AtomicU64::new(1),
            pushing: AtomicUsize::new(0),
            peak_pushes: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/engine.io/", get(poll).post(push))
            .with_state(Arc::clone(&shared));
        (shared, app)
    }

    pub fn handshakes(&self) -> usize {
        self.shared.handshakes.load(Ordering::SeqCst)
    }

    /// Every packet POSTed so far, encoded, in arrival order.
    pub fn received(&self) -> Vec<String> {
        self.shared.received.lock().clone()
    }

    /// Most POSTs ever in flight at once.
    pub fn peak_pushes(&self) -> usize {
        self.shared.peak_pushes.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    /// Queue an encoded packet for every open session.
    pub fn push(&self, packet: &str) {
        for session in self.shared.sessions.lock().values_mut() {
            session.outbox.push_back(packet.to_string());
        }
    }

    /// Drop every session, as a restarted server would.
    pub fn forget_sessions(&self) {
        self.shared.sessions.lock().clear();
    }

    pub async fn wait_for_received(&self, packet: &str) -> bool {
        wait_until(|| self.received().iter().any(|p| p == packet)).await
    }
}

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("sockio=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Poll `condition` every 10ms for up to five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Await `future`, failing the test after five seconds.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

fn payload(packets: &[String]) -> Response {
    let frames: Vec<PacketData> = packets.iter().map(|p| PacketData::from(p.as_str())).collect();
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        encode_payload(&frames),
    )
        .into_response()
}

fn protocol_error(code: u8, message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "code": code, "message": message })),
    )
        .into_response()
}

async fn poll(State(shared): SharedState, Query(params): Params) -> Response {
    let Some(sid) = params.get("sid") else {
        return handshake(shared).await;
    };

    let deadline = Instant::now() + shared.options.hold;
    loop {
        {
            let mut sessions = shared.sessions.lock();
            let Some(session) = sessions.get_mut(sid) else {
                return protocol_error(1, "Session ID unknown");
            };
            if !session.outbox.is_empty() {
                let packets: Vec<String> = session.outbox.drain(..).collect();
                if packets.iter().any(|p| p == "1") {
                    sessions.remove(sid);
                }
                return payload(&packets);
            }
        }
        if Instant::now() >= deadline {
            return payload(&["6".to_string()]);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn handshake(shared: Arc<Shared>) -> Response {
    let attempt = shared.handshakes.fetch_add(1, Ordering::SeqCst);
    if attempt < shared.options.stall_handshakes {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
    if let Some(status) = shared.options.handshake_status {
        return (status, "handshake refused").into_response();
    }

    let sid = format!("sid{}", shared.next_sid.fetch_add(1, Ordering::SeqCst));
    let open = json!({
        "sid": sid,
        "pingInterval": shared.options.ping_interval.as_millis() as u64,
        "pingTimeout": shared.options.ping_timeout.as_millis() as u64,
        "upgrades": shared.options.upgrades,
    });
    let session = MockSession {
        outbox: shared.options.greeting.iter().cloned().collect(),
    };
    let trailer = &shared.options.handshake_trailer;
    if !trailer.iter().any(|p| p == "1") {
        shared.sessions.lock().insert(sid.clone(), session);
    }

    if let Some(delay) = shared.options.close_after {
        let shared = Arc::clone(&shared);
        let sid = sid.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(session) = shared.sessions.lock().get_mut(&sid) {
                session.outbox.push_back("1".into());
            }
        });
    }

    let mut packets = vec![format!("0{open}")];
    packets.extend(trailer.iter().cloned());
    payload(&packets)
}

async fn push(State(shared): SharedState, Query(params): Params, body: Bytes) -> Response {
    let _in_flight = InFlight::enter(&shared);
    let Some(sid) = params.get("sid") else {
        return protocol_error(3, "Bad request");
    };
    if !shared.options.push_delay.is_zero() {
        tokio::time::sleep(shared.options.push_delay).await;
    }
    if !shared.sessions.lock().contains_key(sid) {
        return protocol_error(1, "Session ID unknown");
    }

    let mut replies = Vec::new();
    let mut closed = false;
    for frame in decode_payload(&body) {
        let Ok(frame) = frame else {
            return protocol_error(3, "Bad request");
        };
        let text = String::from_utf8_lossy(frame.as_bytes()).into_owned();
        shared.received.lock().push(text.clone());

        match text.as_bytes().first() {
            Some(b'1') => closed = true,
            Some(b'2') => replies.push(format!("3{}", &text[1..])),
            Some(b'4') => {
                if let Some(responder) = &shared.options.responder {
                    replies.extend(responder(&text[1..]).into_iter().map(|r| format!("4{r}")));
                }
            }
            _ => {}
        }
    }

    let mut sessions = shared.sessions.lock();
    if closed {
        sessions.remove(sid);
    } else if let Some(session) = sessions.get_mut(sid) {
        session.outbox.extend(replies);
    }
    (StatusCode::OK, "ok").into_response()
}
