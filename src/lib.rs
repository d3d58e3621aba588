//! # sockio
//!
//! Asynchronous client for a two-layer real-time messaging protocol:
//!
//! - a session protocol (packet framing, handshake, keep-alive, transport
//!   upgrade) spoken over HTTP long-polling,
//! - a thin message layer on top of it (named events, namespaces and
//!   acknowledgement correlation).
//!
//! ## Feature Flags
//!
//! - `polling` (default): HTTP long-polling transport (reqwest)
//! - `client` (default): session engine (handshake, upgrade, keep-alive)
//! - `message` (default): message layer ([`message::Socket`])
//!
//! ## Modules
//!
//! - [`core`]: Constants, error types and the session context (always included)
//! - [`dispatch`]: Event dispatcher used for every notification (always included)
//! - [`retry`]: Timeout and retry primitives (always included)
//! - [`transport`]: Packet codec, transport contract and polling transport
//! - [`client`]: Session engine (requires `client` feature)
//! - [`message`]: Message layer (requires `message` feature)
//!
//! ## Example Usage
//!
//! ```no_run
//! use sockio::prelude::*;
//!
//! # async fn run() -> sockio::Result<()> {
//! let engine = ClientBuilder::parse("http://localhost:3000/engine.io/")?.build_engine()?;
//!
//! engine.events().on(
//!     "message",
//!     handler(|_: &str, data: &PacketEvent| {
//!         println!("received {data:?}");
//!     }),
//! );
//!
//! engine.start()?.await?;
//! engine
//!     .send_packet(PacketType::Message, Some("Hello!".into()))?
//!     .await?;
//! engine.stop()?.await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Event dispatch (always included)
pub mod dispatch;

// Retry and timeout primitives (always included)
pub mod retry;

// Transport layer; the polling transport is feature-gated inside
pub mod transport;

// Session engine (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Message layer (feature-gated)
#[cfg(feature = "message")]
#[cfg_attr(docsrs, doc(cfg(feature = "message")))]
pub mod message;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core types
    pub use crate::core::*;

    // Dispatch
    pub use crate::dispatch::{BoxError, Callback, Dispatcher, Reply, deferred, fallible, handler};

    // Transport types
    pub use crate::transport::{
        Completion, Packet, PacketData, PacketEvent, PacketType, Transport, TransportConfig,
        TransportError, TransportFactory, TransportState,
    };

    #[cfg(feature = "polling")]
    pub use crate::transport::{PollingTransport, PollingTransportFactory};

    // Engine (when enabled)
    #[cfg(feature = "client")]
    pub use crate::client::{ClientBuilder, ClientConfig, Engine};

    // Message layer (when enabled)
    #[cfg(feature = "message")]
    pub use crate::message::{MessageEvent, MessagePacket, MessageType, Socket};
}

// Re-export commonly used items at crate root
pub use core::{Error, MessageError, Result, SessionContext, StateError};

pub use transport::{PacketData, PacketType, TransportError, TransportState};

#[cfg(feature = "client")]
pub use client::{ClientBuilder, ClientConfig, Engine};

#[cfg(feature = "message")]
pub use message::Socket;
