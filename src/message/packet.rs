//! Message-layer packet codec.
//!
//! A message packet travels as the data of one transport `message` packet:
//!
//! ```text
//! <type digit><path>,<ack id><JSON object>
//! ```
//!
//! On decode every part after the type digit is optional. The path defaults
//! to `/` and a missing object decodes as the empty string.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::MessageError;
use crate::core::constants::DEFAULT_NAMESPACE;
use crate::transport::PacketData;

/// Message packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Join a namespace.
    Connect = 0,
    /// Leave a namespace.
    Disconnect = 1,
    /// Named event with arguments.
    Event = 2,
    /// Acknowledgement of an event.
    Ack = 3,
    /// Error report.
    Error = 4,
    /// Event with binary attachments.
    BinaryEvent = 5,
    /// Acknowledgement with binary attachments.
    BinaryAck = 6,
}

impl MessageType {
    /// All types in code order.
    pub const ALL: [MessageType; 7] = [
        MessageType::Connect,
        MessageType::Disconnect,
        MessageType::Event,
        MessageType::Ack,
        MessageType::Error,
        MessageType::BinaryEvent,
        MessageType::BinaryAck,
    ];

    /// Look up a type by its ASCII code (`b'0'`..=`b'6'`).
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// ASCII code of this type.
    pub fn code(self) -> u8 {
        b'0' + self as u8
    }

    /// Event name under which packets of this type are dispatched.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Connect => "connect",
            MessageType::Disconnect => "disconnect",
            MessageType::Event => "event",
            MessageType::Ack => "ack",
            MessageType::Error => "error",
            MessageType::BinaryEvent => "binary_event",
            MessageType::BinaryAck => "binary_ack",
        }
    }

    /// Look up a type by its name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Check if packets of this type carry binary attachments.
    pub fn is_binary(self) -> bool {
        matches!(self, MessageType::BinaryEvent | MessageType::BinaryAck)
    }

    /// Type acknowledging packets of this type, if they can be acknowledged.
    pub fn ack_type(self) -> Option<Self> {
        match self {
            MessageType::Event => Some(MessageType::Ack),
            MessageType::BinaryEvent => Some(MessageType::BinaryAck),
            _ => None,
        }
    }

    /// Check if this type acknowledges another packet.
    pub fn is_ack(self) -> bool {
        matches!(self, MessageType::Ack | MessageType::BinaryAck)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded message packet.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagePacket {
    /// Packet type.
    pub packet_type: MessageType,
    /// JSON object; the empty string when the packet carries none.
    pub object: Value,
    /// Namespace.
    pub path: String,
    /// Acknowledgement correlation id.
    pub ack_id: Option<u64>,
}

impl MessagePacket {
    /// Packet without object or ack id on the default namespace.
    pub fn new(packet_type: MessageType) -> Self {
        Self {
            packet_type,
            object: empty_object(),
            path: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
        }
    }

    /// Set the object.
    pub fn with_object(mut self, object: Value) -> Self {
        self.object = object;
        self
    }

    /// Set the namespace.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the ack id.
    pub fn with_ack_id(mut self, ack_id: u64) -> Self {
        self.ack_id = Some(ack_id);
        self
    }
}

fn empty_object() -> Value {
    Value::String(String::new())
}

fn is_empty_object(object: &Value) -> bool {
    match object {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

// Tried in order; the object part never starts with a digit, which keeps it
// apart from the ack id.
static GRAMMARS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        r"(?sx)^ (?P<path>/[^,]*) (?:, (?P<id>0|[1-9][0-9]*)? (?P<data>[^0-9].*)? )? $",
        r"(?sx)^ (?P<path>) (?P<id>0|[1-9][0-9]*) (?P<data>[^0-9].*)? $",
        r"(?sx)^ (?P<path>) (?P<id>0|[1-9][0-9]*)? (?P<data>[^0-9].*) $",
        r"(?sx)^ (?P<path>) (?P<id>) (?P<data>) $",
    ]
    .map(|pattern| Regex::new(pattern).unwrap())
});

/// Encode a message packet as the text of a transport `message` packet.
pub fn encode_message(packet: &MessagePacket) -> Result<String, MessageError> {
    if packet.packet_type.is_binary() {
        return Err(MessageError::Unsupported(packet.packet_type.name()));
    }

    let path = if packet.path.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        packet.path.as_str()
    };
    let object = if is_empty_object(&packet.object) {
        String::new()
    } else {
        serde_json::to_string(&packet.object)?
    };
    let ack_id = packet.ack_id.map(|id| id.to_string()).unwrap_or_default();

    Ok(format!(
        "{}{path},{ack_id}{object}",
        char::from(packet.packet_type.code())
    ))
}

/// Decode the data of a transport `message` packet.
pub fn decode_message(data: &PacketData) -> Result<MessagePacket, MessageError> {
    let text = match data {
        PacketData::Text(text) => text,
        PacketData::Binary(bytes) => {
            let code = *bytes.first().ok_or(MessageError::Truncated)?;
            return Err(match MessageType::from_code(code) {
                Some(t) if !t.is_binary() => MessageError::UnexpectedBinary(t.name()),
                Some(t) => MessageError::Unsupported(t.name()),
                None => MessageError::Unsupported("binary"),
            });
        }
    };

    let mut chars = text.chars();
    let code = chars.next().ok_or(MessageError::Truncated)?;
    let packet_type = u8::try_from(code)
        .ok()
        .and_then(MessageType::from_code)
        .ok_or_else(|| MessageError::UnrecognizedType(code.to_string()))?;
    if packet_type.is_binary() {
        return Err(MessageError::ExpectedBinary(packet_type.name()));
    }

    let rest = chars.as_str();
    let captures = GRAMMARS
        .iter()
        .find_map(|grammar| grammar.captures(rest))
        .ok_or(MessageError::UnrecognizedFormat)?;

    let path = captures
        .name("path")
        .map(|m| m.as_str())
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE);
    let ack_id = match captures.name("id").map(|m| m.as_str()) {
        Some(id) if !id.is_empty() => Some(
            id.parse::<u64>()
                .map_err(|_| MessageError::UnrecognizedFormat)?,
        ),
        _ => None,
    };
    let object = match captures.name("data").map(|m| m.as_str()) {
        Some(json) if !json.is_empty() => serde_json::from_str(json)?,
        _ => empty_object(),
    };

    Ok(MessagePacket {
        packet_type,
        object,
        path: path.to_string(),
        ack_id,
    })
}
