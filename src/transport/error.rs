//! Transport layer error types.
//!
//! Wire-format and state errors reach the caller of the offending operation
//! synchronously. Server errors and a peer-initiated close are handled inside
//! the transport, where they drive teardown and a `close` event.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::core::StateError;

/// Malformed packet or payload framing.
///
/// Every payload variant carries the byte offset (or packet index) at which
/// the violation was detected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Payload kind byte is neither text nor binary.
    #[error("unrecognized payload type {kind} at {offset}")]
    UnrecognizedPayloadType {
        /// Offending byte.
        kind: u8,
        /// Byte offset.
        offset: usize,
    },

    /// A length byte is neither a digit value nor the terminator.
    #[error("unrecognized length byte {byte} at {offset}")]
    UnrecognizedLengthByte {
        /// Offending byte.
        byte: u8,
        /// Byte offset.
        offset: usize,
    },

    /// Input ended before the length terminator.
    #[error("payload length field truncated at {offset}")]
    LengthFieldTruncated {
        /// Byte offset of the missing terminator.
        offset: usize,
    },

    /// The length field has no digits.
    #[error("payload length field empty at {offset}")]
    LengthFieldEmpty {
        /// Byte offset of the terminator.
        offset: usize,
    },

    /// The length field has more than [`MAX_LENGTH_DIGITS`](crate::core::constants::MAX_LENGTH_DIGITS) digits.
    #[error("payload length field too long at {offset}")]
    LengthFieldTooLong {
        /// Byte offset of the first excess digit.
        offset: usize,
    },

    /// Input ended before the declared packet length.
    #[error("payload data truncated (received only {received} of {expected} expected octets) at {offset}")]
    DataTruncated {
        /// Octets actually available.
        received: usize,
        /// Declared length, as decimal digits.
        expected: String,
        /// Byte offset of the packet data.
        offset: usize,
    },

    /// A text packet is not valid UTF-8.
    #[error("text packet is not valid UTF-8 at {offset}")]
    InvalidUtf8 {
        /// Byte offset of the packet data.
        offset: usize,
    },

    /// A packet to encode is neither text nor binary.
    #[error("unable to determine encoding for type \"{kind}\" of packet {index}")]
    Unencodable {
        /// Kind of the offending value.
        kind: &'static str,
        /// Index of the packet in the batch.
        index: usize,
    },

    /// Empty packet.
    #[error("packet truncated")]
    PacketTruncated,

    /// Leading type code is not a known packet type.
    #[error("unrecognized packet type {0:?}")]
    UnrecognizedPacketType(String),
}

/// Server protocol error kinds, keyed by the numeric `code` of a 4xx body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerErrorKind {
    /// Code 0.
    UnknownTransport,
    /// Code 1. The session no longer exists on the server.
    UnknownSession,
    /// Code 2.
    BadHandshakeMethod,
    /// Code 3.
    BadRequest,
    /// Any other code, a non-JSON body, a 5xx status, or a send that was not
    /// acknowledged with `ok`.
    Unexpected,
}

impl ServerErrorKind {
    /// Map a numeric error code to its kind.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::UnknownTransport,
            1 => Self::UnknownSession,
            2 => Self::BadHandshakeMethod,
            3 => Self::BadRequest,
            _ => Self::Unexpected,
        }
    }

    /// Human-readable description.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownTransport => "unrecognized transport",
            Self::UnknownSession => "unknown session",
            Self::BadHandshakeMethod => "bad handshake method",
            Self::BadRequest => "bad request",
            Self::Unexpected => "unexpected server error",
        }
    }
}

impl fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server rejected a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind} (status {status}): {message}")]
pub struct ServerError {
    /// Mapped kind.
    pub kind: ServerErrorKind,
    /// HTTP status code.
    pub status: u16,
    /// Server-supplied message, or the raw body.
    pub message: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
}

const MAX_QUOTED_BODY: usize = 200;

impl ServerError {
    /// Build an error from a failed response.
    ///
    /// Only 4xx bodies of the form `{"code": n, "message": "..."}` map to a
    /// specific kind; everything else is [`ServerErrorKind::Unexpected`].
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        if (400..500).contains(&status) {
            if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
                return Self {
                    kind: ServerErrorKind::from_code(parsed.code),
                    status,
                    message: parsed.message,
                };
            }
        }
        Self::unexpected(status, body)
    }

    /// Build an [`ServerErrorKind::Unexpected`] error quoting `body`.
    pub fn unexpected(status: u16, body: &[u8]) -> Self {
        let mut message = String::from_utf8_lossy(body).into_owned();
        if let Some((cut, _)) = message.char_indices().nth(MAX_QUOTED_BODY) {
            message.truncate(cut);
            message.push_str("...");
        }
        Self {
            kind: ServerErrorKind::Unexpected,
            status,
            message,
        }
    }
}

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Wire-format violation.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Operation invoked in a forbidding state.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Server protocol error.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// HTTP client error.
    #[cfg(feature = "polling")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The handshake response was malformed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The peer violated packet sequencing rules.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Deadline expired.
    #[error("operation timed out")]
    Timeout,

    /// The operation was cancelled by a stop, disconnect or standby.
    #[error("operation cancelled")]
    Cancelled,

    /// The transport is closed.
    #[error("transport closed")]
    Closed,

    /// The endpoint cannot be served by this transport.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The URL does not describe a reachable endpoint.
    #[error("endpoint error: {0}")]
    Endpoint(String),
}

impl TransportError {
    /// Check if this error is a cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }

    /// Check if this error reports an unknown session.
    pub fn is_unknown_session(&self) -> bool {
        matches!(
            self,
            TransportError::Server(ServerError {
                kind: ServerErrorKind::UnknownSession,
                ..
            })
        )
    }

    /// Check if this error is a server protocol error.
    pub fn is_server_error(&self) -> bool {
        matches!(self, TransportError::Server(_))
    }

    /// Check if this error is an expected consequence of the session ending
    /// rather than a fault: cancellation, a closed transport, an expired
    /// deadline, an unknown session or a failed response.
    pub fn is_expected(&self) -> bool {
        match self {
            TransportError::Cancelled | TransportError::Closed | TransportError::Timeout => true,
            TransportError::Server(e) => matches!(
                e.kind,
                ServerErrorKind::UnknownSession | ServerErrorKind::Unexpected
            ),
            #[cfg(feature = "polling")]
            TransportError::Http(e) => e.is_body() || e.is_decode(),
            _ => false,
        }
    }
}

impl crate::retry::Retryable for TransportError {
    fn is_cancellation(&self) -> bool {
        TransportError::is_cancellation(self)
    }
}
