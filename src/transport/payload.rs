//! Payload framing: zero or more encoded packets in one HTTP body.
//!
//! Wire format, repeated once per packet:
//!
//! ```text
//! +------+----------------------+------+----------------+
//! | kind | length digits        | 0xFF | packet         |
//! | 1 B  | 1 B per digit (0..9) | 1 B  | length bytes   |
//! +------+----------------------+------+----------------+
//! ```
//!
//! `kind` is `0x00` for a UTF-8 text packet and `0x01` for a binary packet.
//! Length digits hold each decimal digit's numeric value, not its ASCII code.

use serde_json::Value;

use super::error::WireError;
use super::packet::PacketData;
use crate::core::constants::{
    MAX_LENGTH_DIGITS, PAYLOAD_KIND_BINARY, PAYLOAD_KIND_TEXT, PAYLOAD_LENGTH_TERMINATOR,
};

/// Lazily decode the packets of a payload.
///
/// See [`PayloadDecoder`].
pub fn decode_payload(raw: &[u8]) -> PayloadDecoder<'_> {
    PayloadDecoder {
        raw,
        pos: 0,
        failed: false,
    }
}

/// Iterator over the encoded packets of a payload.
///
/// Yields each packet as soon as it has been framed, so packets preceding a
/// framing error are still delivered. After the first error the iterator is
/// exhausted.
#[derive(Debug, Clone)]
pub struct PayloadDecoder<'a> {
    raw: &'a [u8],
    pos: usize,
    failed: bool,
}

impl PayloadDecoder<'_> {
    /// Byte offset of the next packet frame.
    pub fn offset(&self) -> usize {
        self.pos
    }

    fn next_frame(&mut self) -> Result<PacketData, WireError> {
        let kind = self.raw[self.pos];
        if kind != PAYLOAD_KIND_TEXT && kind != PAYLOAD_KIND_BINARY {
            return Err(WireError::UnrecognizedPayloadType {
                kind,
                offset: self.pos,
            });
        }
        self.pos += 1;

        let mut digits = String::new();
        loop {
            let Some(&byte) = self.raw.get(self.pos) else {
                return Err(WireError::LengthFieldTruncated { offset: self.pos });
            };
            if byte == PAYLOAD_LENGTH_TERMINATOR {
                self.pos += 1;
                break;
            }
            if byte > 9 {
                return Err(WireError::UnrecognizedLengthByte {
                    byte,
                    offset: self.pos,
                });
            }
            if digits.len() == MAX_LENGTH_DIGITS {
                return Err(WireError::LengthFieldTooLong { offset: self.pos });
            }
            digits.push(char::from(b'0' + byte));
            self.pos += 1;
        }

        if digits.is_empty() {
            return Err(WireError::LengthFieldEmpty {
                offset: self.pos - 1,
            });
        }

        let available = self.raw.len() - self.pos;
        let len = match digits.parse::<usize>() {
            Ok(len) if len <= available => len,
            declared => {
                return Err(WireError::DataTruncated {
                    received: available,
                    expected: declared
                        .map(|len| len.to_string())
                        .unwrap_or_else(|_| digits.trim_start_matches('0').to_string()),
                    offset: self.pos,
                });
            }
        };

        let bytes = &self.raw[self.pos..self.pos + len];
        let packet = if kind == PAYLOAD_KIND_TEXT {
            let text = std::str::from_utf8(bytes)
                .map_err(|_| WireError::InvalidUtf8 { offset: self.pos })?;
            PacketData::Text(text.to_string())
        } else {
            PacketData::Binary(bytes.to_vec())
        };
        self.pos += len;

        Ok(packet)
    }
}

impl Iterator for PayloadDecoder<'_> {
    type Item = Result<PacketData, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.raw.len() {
            return None;
        }

        let frame = self.next_frame();
        self.failed = frame.is_err();
        Some(frame)
    }
}

/// Frame encoded packets into one payload.
pub fn encode_payload<'a, I>(packets: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a PacketData>,
{
    let mut out = Vec::new();
    for packet in packets {
        let kind = if packet.is_binary() {
            PAYLOAD_KIND_BINARY
        } else {
            PAYLOAD_KIND_TEXT
        };
        out.push(kind);
        out.extend(packet.len().to_string().bytes().map(|digit| digit - b'0'));
        out.push(PAYLOAD_LENGTH_TERMINATOR);
        out.extend_from_slice(packet.as_bytes());
    }
    out
}

/// Frame loosely typed packets into one payload.
///
/// JSON strings become text packets and arrays of byte values become binary
/// packets. Anything else is rejected with the index of the offending packet.
pub fn encode_payload_values(values: &[Value]) -> Result<Vec<u8>, WireError> {
    let packets = values
        .iter()
        .enumerate()
        .map(|(index, value)| packet_from_value(index, value))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(encode_payload(&packets))
}

fn packet_from_value(index: usize, value: &Value) -> Result<PacketData, WireError> {
    let unencodable = |kind| WireError::Unencodable { kind, index };
    match value {
        Value::String(text) => Ok(PacketData::Text(text.clone())),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| unencodable("array"))
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(PacketData::Binary),
        Value::Null => Err(unencodable("null")),
        Value::Bool(_) => Err(unencodable("bool")),
        Value::Number(_) => Err(unencodable("number")),
        Value::Object(_) => Err(unencodable("object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    const TEXT_FRAME: &[u8] = b"\x00\x03\xff4{}";
    const BINARY_FRAME: &[u8] = b"\x01\x05\xff4\x00\x01\x02\x03";

    fn decode_all(raw: &[u8]) -> Result<Vec<PacketData>, WireError> {
        decode_payload(raw).collect()
    }

    fn mixed() -> Vec<u8> {
        [TEXT_FRAME, BINARY_FRAME].concat()
    }

    #[test]
    fn test_empty_payload() {
        assert!(decode_all(b"").unwrap().is_empty());
        assert!(encode_payload(&Vec::<PacketData>::new()).is_empty());
    }

    #[test]
    fn test_known_vectors() {
        assert_eq!(encode_payload(&[PacketData::from("4{}")]), TEXT_FRAME);
        assert_eq!(
            encode_payload(&[PacketData::from(b"4\x00\x01\x02\x03".to_vec())]),
            BINARY_FRAME
        );
        assert_eq!(
            decode_all(&mixed()).unwrap(),
            vec![
                PacketData::from("4{}"),
                PacketData::from(b"4\x00\x01\x02\x03".to_vec())
            ]
        );
    }

    #[test]
    fn test_multi_digit_length() {
        let text = "x".repeat(1234);
        let encoded = encode_payload(&[PacketData::Text(text.clone())]);
        assert_eq!(&encoded[..6], &[0x00, 1, 2, 3, 4, 0xFF]);
        assert_eq!(decode_all(&encoded).unwrap(), vec![PacketData::Text(text)]);
    }

    #[test]
    fn test_roundtrip_mixed() {
        let packets = vec![
            PacketData::from("2beat"),
            PacketData::from(vec![0xFFu8; 300]),
            PacketData::from("4☃ snow"),
            PacketData::from(Vec::<u8>::new()),
            PacketData::from(""),
        ];
        assert_eq!(decode_all(&encode_payload(&packets)).unwrap(), packets);
    }

    #[test]
    fn test_unrecognized_payload_type() {
        let err = decode_all(b"\x02\x01\xff6").unwrap_err();
        assert_eq!(err.to_string(), "unrecognized payload type 2 at 0");

        let mut raw = mixed();
        raw.push(0x02);
        assert_eq!(
            decode_all(&raw).unwrap_err().to_string(),
            "unrecognized payload type 2 at 14"
        );
    }

    #[test]
    fn test_unrecognized_length_byte() {
        let err = decode_all(b"\x00\x0a\xff6").unwrap_err();
        assert_eq!(err.to_string(), "unrecognized length byte 10 at 1");

        let mut raw = mixed();
        raw.extend_from_slice(b"\x00\x0a\xff6");
        assert_eq!(
            decode_all(&raw).unwrap_err().to_string(),
            "unrecognized length byte 10 at 15"
        );
    }

    #[test]
    fn test_length_field_truncated() {
        let err = decode_all(b"\x00\x01\x02").unwrap_err();
        assert_eq!(err.to_string(), "payload length field truncated at 3");

        let mut raw = mixed();
        raw.extend_from_slice(b"\x00\x01\x02");
        assert_eq!(
            decode_all(&raw).unwrap_err().to_string(),
            "payload length field truncated at 17"
        );
    }

    #[test]
    fn test_data_truncated() {
        let err = decode_all(b"\x00\x03\xff4").unwrap_err();
        assert_eq!(
            err.to_string(),
            "payload data truncated (received only 1 of 3 expected octets) at 3"
        );
    }

    #[test]
    fn test_length_field_limits() {
        let mut raw = vec![0x00];
        raw.extend(std::iter::repeat_n(9u8, MAX_LENGTH_DIGITS + 1));
        raw.push(0xFF);
        assert_eq!(
            decode_all(&raw).unwrap_err(),
            WireError::LengthFieldTooLong {
                offset: 1 + MAX_LENGTH_DIGITS
            }
        );

        let mut raw = vec![0x00];
        raw.extend(std::iter::repeat_n(9u8, 40));
        raw.extend_from_slice(&[0xFF, b'4']);
        match decode_all(&raw).unwrap_err() {
            WireError::DataTruncated {
                received, expected, ..
            } => {
                assert_eq!(received, 1);
                assert_eq!(expected, "9".repeat(40));
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert_eq!(
            decode_all(b"\x00\xff").unwrap_err(),
            WireError::LengthFieldEmpty { offset: 1 }
        );
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(
            decode_all(b"\x00\x02\xff4\xc3").unwrap_err(),
            WireError::InvalidUtf8 { offset: 3 }
        );
        assert!(decode_all(b"\x01\x02\xff4\xc3").is_ok());
    }

    #[test]
    fn test_decoder_is_lazy_and_fuses() {
        let mut raw = TEXT_FRAME.to_vec();
        raw.push(0x07);
        raw.extend_from_slice(TEXT_FRAME);

        let mut decoder = decode_payload(&raw);
        assert_eq!(decoder.next(), Some(Ok(PacketData::from("4{}"))));
        assert_eq!(decoder.offset(), 6);
        assert!(matches!(decoder.next(), Some(Err(_))));
        assert_eq!(decoder.next(), None);
    }

    #[test]
    fn test_encode_values() {
        let encoded = encode_payload_values(&[json!("4{}"), json!([52, 0, 1, 2, 3])]).unwrap();
        assert_eq!(encoded, mixed());
    }

    #[test]
    fn test_encode_values_rejects_with_index() {
        let err = encode_payload_values(&[json!("4"), json!("6"), json!(42)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unable to determine encoding for type \"number\" of packet 2"
        );

        let err = encode_payload_values(&[json!([1, 256])]).unwrap_err();
        assert_eq!(err, WireError::Unencodable { kind: "array", index: 0 });
    }
}
