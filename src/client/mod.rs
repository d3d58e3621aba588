//! Client session engine.
//!
//! [`Engine`] drives one session over the transports it knows about;
//! [`ClientBuilder`] configures it.

mod config;
mod engine;

pub use config::{ClientBuilder, ClientConfig};
pub use engine::{ENGINE_EVENTS, Engine};
