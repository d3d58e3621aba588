//! Error types shared across layers.

use thiserror::Error;

use crate::transport::{TransportError, TransportState};

/// An operation was invoked while the transport or engine was in a state that
/// forbids it.
///
/// Returned synchronously, before any side effect happens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The requested transition is not in the transition table.
    #[error("invalid transport state transition {from} -> {to}")]
    InvalidTransition {
        /// State the transport was in.
        from: TransportState,
        /// State that was requested.
        to: TransportState,
    },

    /// The operation requires a different transport state.
    #[error("cannot {operation} while {state}")]
    NotPermitted {
        /// Name of the rejected operation.
        operation: &'static str,
        /// State the transport was in.
        state: TransportState,
    },

    /// The engine has no active transport.
    #[error("engine is not running")]
    NotRunning,

    /// The engine already owns an active transport.
    #[error("engine already started")]
    AlreadyStarted,

    /// A stop is already in flight.
    #[error("engine is already stopping")]
    StopInFlight,
}

/// Violations of the message-layer packet grammar.
#[derive(Debug, Error)]
pub enum MessageError {
    /// Empty message packet.
    #[error("message packet truncated")]
    Truncated,

    /// Leading type code is not a known message type.
    #[error("unrecognized message packet type {0:?}")]
    UnrecognizedType(String),

    /// The remainder matches none of the message grammars.
    #[error("unrecognized message packet format")]
    UnrecognizedFormat,

    /// The object part is not valid JSON.
    #[error("unparsable JSON data: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary payload carried by a text-only packet type.
    #[error("packet type is {0:?}, but payload is binary")]
    UnexpectedBinary(&'static str),

    /// Text payload carried by a binary packet type.
    #[error("packet type is {0:?}, but payload is not binary")]
    ExpectedBinary(&'static str),

    /// Binary message packets are not implemented.
    #[error("{0:?} packets are currently unsupported")]
    Unsupported(&'static str),

    /// Acknowledgement callbacks are only meaningful for events.
    #[error("cannot request an acknowledgement for {0:?} packets")]
    AckNotAllowed(&'static str),
}

/// Top-level crate errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message-layer error.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// State error.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if this error is the expected outcome of a cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Transport(e) if e.is_cancellation())
    }
}

/// Result type for crate operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
