//! Message layer.
//!
//! Application packets carried inside transport `message` packets: named
//! events, namespaces and acknowledgement correlation.

mod packet;
mod socket;

pub use packet::{MessagePacket, MessageType, decode_message, encode_message};
pub use socket::{MessageEvent, Socket, ack_event};
