//! Single packet encoding and decoding.
//!
//! A packet is one type-code character followed directly by its data:
//!
//! ```text
//! "4Hello!"            text message packet
//! b"4\x00\x01\x02"     binary message packet
//! "2"                  ping without data
//! ```
//!
//! Text packets stay text and binary packets stay raw bytes; the type code is
//! the ASCII digit of the packet type in both cases.

use std::fmt;

use super::error::WireError;

/// Transport-level packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Handshake response carrying the session parameters.
    Open = 0,
    /// Session end.
    Close = 1,
    /// Liveness check.
    Ping = 2,
    /// Liveness check reply.
    Pong = 3,
    /// Application data.
    Message = 4,
    /// Transport upgrade.
    Upgrade = 5,
    /// Filler answering an idle poll.
    Noop = 6,
}

impl PacketType {
    /// All packet types, in code order.
    pub const ALL: [PacketType; 7] = [
        PacketType::Open,
        PacketType::Close,
        PacketType::Ping,
        PacketType::Pong,
        PacketType::Message,
        PacketType::Upgrade,
        PacketType::Noop,
    ];

    /// Parse a packet type from its ASCII type code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'0'..=b'6' => Some(Self::ALL[usize::from(code - b'0')]),
            _ => None,
        }
    }

    /// ASCII type code.
    pub fn code(self) -> u8 {
        b'0' + self as u8
    }

    /// Event name used when the packet is dispatched.
    pub fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Message => "message",
            Self::Upgrade => "upgrade",
            Self::Noop => "noop",
        }
    }

    /// Parse a packet type from its event name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Packet data, or one encoded packet inside a payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PacketData {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl PacketData {
    /// Raw bytes of the data.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PacketData::Text(s) => s.as_bytes(),
            PacketData::Binary(b) => b,
        }
    }

    /// The text, if this is text data.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PacketData::Text(s) => Some(s),
            PacketData::Binary(_) => None,
        }
    }

    /// Check if this is binary data.
    pub fn is_binary(&self) -> bool {
        matches!(self, PacketData::Binary(_))
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Check if there are no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for PacketData {
    fn from(s: &str) -> Self {
        PacketData::Text(s.to_string())
    }
}

impl From<String> for PacketData {
    fn from(s: String) -> Self {
        PacketData::Text(s)
    }
}

impl From<Vec<u8>> for PacketData {
    fn from(b: Vec<u8>) -> Self {
        PacketData::Binary(b)
    }
}

impl From<&[u8]> for PacketData {
    fn from(b: &[u8]) -> Self {
        PacketData::Binary(b.to_vec())
    }
}

/// A decoded packet.
///
/// `None` means no data was given; it encodes exactly like empty text.
/// Decoding always yields the data part, even when it is empty, so a
/// received `"4"` carries `Some(Text(""))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet type.
    pub packet_type: PacketType,
    /// Packet data, if any.
    pub data: Option<PacketData>,
}

impl Packet {
    /// Create a packet.
    pub fn new(packet_type: PacketType, data: Option<PacketData>) -> Self {
        Self { packet_type, data }
    }

    /// Encode this packet.
    pub fn encode(&self) -> PacketData {
        encode_packet(self.packet_type, self.data.as_ref())
    }
}

/// Encode one packet.
pub fn encode_packet(packet_type: PacketType, data: Option<&PacketData>) -> PacketData {
    let code = packet_type.code();
    match data {
        None => PacketData::Text(char::from(code).to_string()),
        Some(PacketData::Text(text)) => {
            let mut encoded = String::with_capacity(text.len() + 1);
            encoded.push(char::from(code));
            encoded.push_str(text);
            PacketData::Text(encoded)
        }
        Some(PacketData::Binary(bytes)) => {
            let mut encoded = Vec::with_capacity(bytes.len() + 1);
            encoded.push(code);
            encoded.extend_from_slice(bytes);
            PacketData::Binary(encoded)
        }
    }
}

/// Decode one packet.
pub fn decode_packet(raw: &PacketData) -> Result<Packet, WireError> {
    let (&code, rest) = raw.as_bytes().split_first().ok_or(WireError::PacketTruncated)?;

    let packet_type = PacketType::from_code(code).ok_or_else(|| {
        let shown = match raw {
            PacketData::Text(text) => text.chars().next().map(String::from).unwrap_or_default(),
            PacketData::Binary(_) => code.escape_ascii().to_string(),
        };
        WireError::UnrecognizedPacketType(shown)
    })?;

    // The code is ASCII, so the text remainder starts on a char boundary.
    let data = match raw {
        PacketData::Text(text) => PacketData::Text(text[1..].to_string()),
        PacketData::Binary(_) => PacketData::Binary(rest.to_vec()),
    };

    Ok(Packet::new(packet_type, Some(data)))
}
