//! Session engine against an in-process server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use sockio::client::{ClientBuilder, ENGINE_EVENTS, Engine};
use sockio::dispatch::handler;
use sockio::transport::{PacketData, PacketEvent, PacketType, TransportError};
use sockio::{Error, StateError};

use common::{MockOptions, MockServer, wait_until, within};

fn engine(server: &MockServer) -> Engine {
    ClientBuilder::new(server.url.clone())
        .default_timeout(Duration::from_millis(500))
        .build_engine()
        .unwrap()
}

/// Record `open`, `message` and `close` as `name` or `name:data`.
fn record(engine: &Engine) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for event in ["open", "message", "close"] {
        let log = Arc::clone(&log);
        engine.events().on(
            event,
            handler(move |name: &str, data: &PacketEvent| {
                let entry = match data.as_ref().and_then(PacketData::as_text) {
                    Some(text) => format!("{name}:{text}"),
                    None => name.to_string(),
                };
                log.lock().push(entry);
            }),
        );
    }
    log
}

fn count(log: &Mutex<Vec<String>>, entry: &str) -> usize {
    log.lock().iter().filter(|e| *e == entry).count()
}

#[tokio::test]
async fn test_open_message_close() {
    let server = MockServer::start(MockOptions {
        greeting: vec!["4Hello!".into()],
        ..MockOptions::default()
    })
    .await;
    let engine = engine(&server);
    let log = record(&engine);

    within(engine.start().unwrap()).await.unwrap();
    assert!(engine.running());
    assert_eq!(engine.transport_name(), Some("polling"));
    assert_eq!(engine.session_id().as_deref(), Some("sid1"));

    assert!(wait_until(|| count(&log, "message:Hello!") == 1).await);
    within(engine.stop().unwrap()).await.unwrap();

    assert_eq!(*log.lock(), vec!["open", "message:Hello!", "close"]);
    assert!(!engine.running());
    assert_eq!(engine.session_id(), None);
    assert!(server.received().contains(&"1".to_string()));
}

#[tokio::test]
async fn test_stop_while_sending() {
    let server = MockServer::start(MockOptions::default()).await;
    let engine = engine(&server);
    let log = record(&engine);

    within(engine.start().unwrap()).await.unwrap();
    let pings: Vec<_> = (0..10)
        .map(|_| engine.send_packet(PacketType::Ping, None).unwrap())
        .collect();

    let stopping = engine.stop().unwrap();
    assert!(matches!(engine.stop(), Err(StateError::StopInFlight)));

    for ping in pings {
        let result = within(ping).await;
        assert!(
            result.as_ref().is_ok() || result.as_ref().is_err_and(|e| e.is_cancellation()),
            "unexpected ping result {result:?}"
        );
    }
    within(stopping).await.unwrap();

    assert_eq!(count(&log, "close"), 1);
    assert!(matches!(engine.stop(), Err(StateError::NotRunning)));
    assert!(matches!(
        engine.send_packet(PacketType::Ping, None),
        Err(StateError::NotRunning)
    ));
}

#[tokio::test]
async fn test_start_twice() {
    let server = MockServer::start(MockOptions::default()).await;
    let engine = engine(&server);

    let starting = engine.start().unwrap();
    assert!(matches!(engine.start(), Err(StateError::AlreadyStarted)));
    within(starting).await.unwrap();
    assert!(matches!(engine.start(), Err(StateError::AlreadyStarted)));

    within(engine.stop().unwrap()).await.unwrap();
}

#[tokio::test]
async fn test_server_ping_is_answered() {
    let server = MockServer::start(MockOptions::default()).await;
    let engine = engine(&server);
    let pings = Arc::new(Mutex::new(Vec::new()));
    let p = Arc::clone(&pings);
    engine.events().on(
        "ping",
        handler(move |_: &str, data: &PacketEvent| p.lock().push(data.clone())),
    );

    within(engine.start().unwrap()).await.unwrap();
    server.push("2beat");

    assert!(server.wait_for_received("3beat").await);
    assert_eq!(*pings.lock(), vec![Some(PacketData::from("beat"))]);

    within(engine.stop().unwrap()).await.unwrap();
}

#[tokio::test]
async fn test_keepalive_pings() {
    let server = MockServer::start(MockOptions {
        ping_interval: Duration::from_millis(100),
        ..MockOptions::default()
    })
    .await;
    let engine = engine(&server);
    let pongs = Arc::new(Mutex::new(0));
    let p = Arc::clone(&pongs);
    engine
        .events()
        .on("pong", handler(move |_: &str, _: &PacketEvent| *p.lock() += 1));

    within(engine.start().unwrap()).await.unwrap();

    assert!(wait_until(|| server.received().iter().filter(|p| *p == "2").count() >= 2).await);
    assert!(wait_until(|| *pongs.lock() >= 1).await);

    within(engine.stop().unwrap()).await.unwrap();
}

#[tokio::test]
async fn test_peer_close_then_restart() {
    let server = MockServer::start(MockOptions {
        close_after: Some(Duration::from_millis(200)),
        ..MockOptions::default()
    })
    .await;
    let engine = engine(&server);
    let log = record(&engine);

    within(engine.start().unwrap()).await.unwrap();
    assert!(wait_until(|| count(&log, "close") == 1).await);
    assert!(!engine.running());
    assert_eq!(engine.session_id(), None);
    assert!(matches!(engine.stop(), Err(StateError::NotRunning)));

    within(engine.start().unwrap()).await.unwrap();
    assert_eq!(engine.session_id().as_deref(), Some("sid2"));
    assert_eq!(server.handshakes(), 2);

    assert!(wait_until(|| count(&log, "close") == 2).await);
    assert_eq!(*log.lock(), vec!["open", "close", "open", "close"]);
}

#[tokio::test]
async fn test_message_then_peer_close() {
    let server = MockServer::start(MockOptions {
        greeting: vec!["4Hello!".into(), "1".into()],
        ..MockOptions::default()
    })
    .await;
    let engine = engine(&server);
    let log = record(&engine);

    within(engine.start().unwrap()).await.unwrap();

    assert!(wait_until(|| count(&log, "close") == 1).await);
    assert_eq!(*log.lock(), vec!["open", "message:Hello!", "close"]);
    assert!(!engine.running());
    assert_eq!(engine.session_id(), None);
    assert!(matches!(engine.stop(), Err(StateError::NotRunning)));
}

#[tokio::test]
async fn test_message_then_delayed_peer_close() {
    let server = MockServer::start(MockOptions {
        greeting: vec!["4Hello!".into()],
        close_after: Some(Duration::from_millis(50)),
        ..MockOptions::default()
    })
    .await;
    let engine = engine(&server);
    let log = record(&engine);

    within(engine.start().unwrap()).await.unwrap();

    assert!(wait_until(|| count(&log, "close") == 1).await);
    assert_eq!(*log.lock(), vec!["open", "message:Hello!", "close"]);
    assert!(!engine.running());
    assert_eq!(engine.session_id(), None);
}

#[tokio::test]
async fn test_close_in_handshake_fails_start() {
    let server = MockServer::start(MockOptions {
        handshake_trailer: vec!["4early".into(), "1".into()],
        ..MockOptions::default()
    })
    .await;
    let engine = engine(&server);
    let log = record(&engine);

    let err = within(engine.start().unwrap()).await.unwrap_err();
    assert!(matches!(err, TransportError::Closed));

    // The session existed, so it closes; it never opened.
    assert!(wait_until(|| count(&log, "close") == 1).await);
    assert_eq!(*log.lock(), vec!["close"]);
    assert!(!engine.running());
    assert_eq!(engine.session_id(), None);
    assert!(matches!(engine.stop(), Err(StateError::NotRunning)));
    assert!(server.received().is_empty());

    // Nothing is left attached, so the engine can start again.
    let again = within(engine.start().unwrap()).await.unwrap_err();
    assert!(matches!(again, TransportError::Closed));
    assert_eq!(server.handshakes(), 2);
}

#[tokio::test]
async fn test_expired_session_closes_engine() {
    let server = MockServer::start(MockOptions::default()).await;
    let engine = engine(&server);
    let log = record(&engine);

    within(engine.start().unwrap()).await.unwrap();
    server.forget_sessions();

    assert!(wait_until(|| count(&log, "close") == 1).await);
    assert!(!engine.running());
    assert!(matches!(
        engine.send_packet(PacketType::Message, Some("late".into())),
        Err(StateError::NotRunning)
    ));
}

#[tokio::test]
async fn test_unreachable_server() {
    let engine = ClientBuilder::parse("http://127.0.0.1:9/engine.io/")
        .unwrap()
        .default_timeout(Duration::from_millis(200))
        .handshake_retries(0)
        .build_engine()
        .unwrap();
    let log = record(&engine);

    let err = within(engine.start().unwrap()).await.unwrap_err();
    assert!(!err.is_cancellation());
    assert!(!engine.running());
    assert!(log.lock().is_empty());

    // The failed start left nothing behind.
    assert!(matches!(engine.stop(), Err(StateError::NotRunning)));
    assert!(within(engine.start().unwrap()).await.is_err());
}

#[test]
fn test_engine_event_names() {
    assert_eq!(ENGINE_EVENTS[0], "open");
    assert!(ENGINE_EVENTS.contains(&PacketType::Message.name()));
    assert!(matches!(
        ClientBuilder::parse("not a url"),
        Err(Error::Config(_))
    ));
}
