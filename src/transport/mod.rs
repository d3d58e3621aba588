//! Transport layer.
//!
//! This module moves packets between the client and one server session:
//!
//! - **Packet codec**: [`PacketType`], [`encode_packet`], [`decode_packet`]
//! - **Payload framing**: [`encode_payload`], [`decode_payload`]
//! - **State machine**: [`TransportState`] and its validated [`StateCell`]
//! - **Endpoints**: [`Endpoint`] resolution of `http`, `https`, `ws`, `wss`
//!   and `unix` URLs
//! - **Long polling**: [`PollingTransport`] (requires `polling` feature)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Message Layer                  │
//! ├─────────────────────────────────────────┤
//! │          Engine (session)               │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   packets, payloads, state, polling     │
//! ├─────────────────────────────────────────┤
//! │              HTTP                       │
//! └─────────────────────────────────────────┘
//! ```

mod config;
mod endpoint;
mod error;
mod packet;
mod payload;
mod state;
mod traits;

#[cfg(feature = "polling")]
mod polling;

pub use config::TransportConfig;
pub use endpoint::Endpoint;
pub use error::*;
pub use packet::*;
pub use payload::*;
pub use state::{StateCell, TransportState};
pub use traits::*;

#[cfg(feature = "polling")]
#[cfg_attr(docsrs, doc(cfg(feature = "polling")))]
pub use polling::{PollingTransport, PollingTransportFactory};
