//! Protocol constants.
//!
//! Values in the first section are fixed by the wire protocol and MUST NOT be
//! changed. The remaining ones are client defaults that can be overridden
//! through configuration.

use std::time::Duration;

// =============================================================================
// WIRE PROTOCOL
// =============================================================================

/// Protocol revision sent as the `EIO` query parameter.
pub const PROTOCOL_REVISION: u8 = 3;

/// Payload kind byte announcing a UTF-8 text packet.
pub const PAYLOAD_KIND_TEXT: u8 = 0x00;

/// Payload kind byte announcing a binary packet.
pub const PAYLOAD_KIND_BINARY: u8 = 0x01;

/// Terminator of a payload length field.
pub const PAYLOAD_LENGTH_TERMINATOR: u8 = 0xFF;

/// Maximum number of decimal digits accepted in a payload length field.
///
/// Peers serialize lengths as decimal numbers whose largest representable
/// value is around `1e308`, so a longer digit string can only be garbage.
pub const MAX_LENGTH_DIGITS: usize = 310;

/// Literal body a server answers a successful send with.
pub const SEND_ACKNOWLEDGEMENT: &str = "ok";

/// Name of the HTTP long-polling transport.
pub const TRANSPORT_POLLING: &str = "polling";

// =============================================================================
// HTTP SURFACE
// =============================================================================

/// `Accept` header sent with every request.
pub const ACCEPT: &str = "application/octet-stream, application/json";

/// `Accept-Charset` header sent with every request.
pub const ACCEPT_CHARSET: &str = "UTF-8";

/// `Content-Type` of every POST body.
pub const CONTENT_TYPE: &str = "application/octet-stream";

// =============================================================================
// CLIENT DEFAULTS
// =============================================================================

/// Deadline applied to network operations before a session exists.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Size of the HTTP connection pool of one polling transport.
///
/// One connection is reserved for the receive loop, the rest back the send
/// workers.
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Retries of a failed handshake request.
pub const DEFAULT_HANDSHAKE_RETRIES: u32 = 2;

/// Retries of the best-effort close packet sent on disconnect.
pub const DEFAULT_CLOSE_RETRIES: u32 = 1;

/// Upper bound of the default exponential backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(32);

// =============================================================================
// MESSAGE LAYER
// =============================================================================

/// Namespace used when a message packet carries no path.
pub const DEFAULT_NAMESPACE: &str = "/";

/// First serial handed out for acknowledgement correlation.
pub const FIRST_ACK_SERIAL: u64 = 1;
