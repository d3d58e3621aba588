use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use sockio::client::{ClientBuilder, ENGINE_EVENTS};
use sockio::dispatch::handler;
use sockio::message::MessageEvent;
use sockio::transport::{PacketData, PacketEvent};
use sockio::{Socket, StateError};
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Parser)]
#[command(version, about = "Listen to a server and print every event")]
struct Arguments {
    /// Endpoint of the server, e.g. http://localhost:3000/socket.io/
    #[arg(long, env = "SOCKIO_URL", default_value = "http://localhost:3000/socket.io/")]
    url: Url,

    /// Log filter
    #[arg(long, env = "SOCKIO_LOG", default_value = "info,sockio=debug")]
    log: String,

    /// Deadline of requests before a session exists, in milliseconds
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,

    /// HTTP connections per transport
    #[arg(long, default_value_t = 4)]
    max_connections: usize,

    /// Namespace to join
    #[arg(long, default_value = "/")]
    namespace: String,

    /// Event to emit once the session is open
    #[arg(long)]
    emit: Option<String>,

    /// JSON arguments of the emitted event
    #[arg(long = "arg", value_parser = parse_json)]
    args: Vec<Value>,

    /// Close the session after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,
}

fn parse_json(raw: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(raw).or_else(|_| Ok(Value::String(raw.to_string())))
}

fn describe(data: &PacketEvent) -> String {
    match data {
        Some(PacketData::Text(text)) => text.clone(),
        Some(PacketData::Binary(bytes)) => format!("<{} bytes>", bytes.len()),
        None => String::new(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Arguments::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log))
        .init();

    let engine = ClientBuilder::new(args.url.clone())
        .default_timeout(Duration::from_millis(args.timeout_ms))
        .max_connections(args.max_connections)
        .build_engine()?;

    for event in ENGINE_EVENTS {
        engine.events().on(
            event,
            handler(|event: &str, data: &PacketEvent| {
                info!(event, data = %describe(data), "engine event");
            }),
        );
    }

    let socket = Socket::new(engine.clone());
    for event in ["connect", "disconnect", "event", "ack", "error"] {
        socket.events().on(
            event,
            handler(|event: &str, (path, object): &MessageEvent| {
                info!(event, path = %path, object = %object, "message");
            }),
        );
    }

    let closed = engine
        .events()
        .future_on("close")
        .context("close is an engine event")?;

    engine.start()?.await.context("cannot open session")?;

    if args.namespace != "/" {
        socket.connect(&args.namespace)?.await?;
    }
    if let Some(event) = &args.emit {
        let ack = handler(|_: &str, (path, object): &MessageEvent| {
            info!(path = %path, object = %object, "acknowledged");
        });
        socket
            .emit(event, args.args.clone(), &args.namespace, Some(ack))?
            .await?;
    }

    let expired = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = closed => {
            info!("session closed by server");
            return Ok(());
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupted, closing session");
        }
        () = expired => info!("duration elapsed, closing session"),
    }

    match engine.stop() {
        Ok(stopping) => stopping.await?,
        Err(StateError::NotRunning) => {}
        Err(e) => warn!(error = %e, "cannot stop"),
    }
    Ok(())
}
