//! Processing of received batches.

use crate::core::{Session, SessionContext};
use crate::dispatch::Dispatcher;
use crate::transport::error::TransportError;
use crate::transport::packet::{PacketData, PacketType, decode_packet};
use crate::transport::payload::decode_payload;
use crate::transport::traits::PacketEvent;

/// Outcome of one processed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReceiveStep {
    /// Keep polling.
    Continue,
    /// The peer sent `close`; the context has been cleared.
    PeerClosed,
}

/// Parse the `open` packet leading a handshake response.
///
/// Returns the negotiated session and the byte offset of the packets that
/// followed it in the same response.
pub(crate) fn parse_handshake(body: &[u8]) -> Result<(Session, usize), TransportError> {
    let mut frames = decode_payload(body);
    let first = frames
        .next()
        .ok_or_else(|| TransportError::Handshake("empty handshake response".into()))??;

    let packet = decode_packet(&first)?;
    if packet.packet_type != PacketType::Open {
        return Err(TransportError::Handshake(format!(
            "expected open packet, received {}",
            packet.packet_type
        )));
    }

    let parameters = packet
        .data
        .as_ref()
        .and_then(PacketData::as_text)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| TransportError::Handshake("open packet without session parameters".into()))?;
    let session = Session::from_handshake(parameters)
        .map_err(|e| TransportError::Handshake(format!("malformed session parameters: {e}")))?;

    Ok((session, frames.offset()))
}

/// Dispatch every packet of a batch under its packet name.
///
/// An `open` packet is a protocol error here: it may only lead a handshake
/// response. A `close` packet clears `context` and ends the batch; anything
/// following it is a protocol error.
pub(crate) fn dispatch_batch(
    body: &[u8],
    context: &SessionContext,
    events: &Dispatcher<PacketEvent>,
) -> Result<ReceiveStep, TransportError> {
    let mut closed = false;

    for frame in decode_payload(body) {
        let packet = decode_packet(&frame?)?;
        if closed {
            return Err(TransportError::Protocol(format!(
                "{} packet after close",
                packet.packet_type
            )));
        }

        match packet.packet_type {
            PacketType::Open => {
                return Err(TransportError::Protocol("unexpected open packet".into()));
            }
            PacketType::Close => {
                context.clear();
                closed = true;
            }
            other => events.dispatch(other.name(), &packet.data),
        }
    }

    Ok(if closed {
        ReceiveStep::PeerClosed
    } else {
        ReceiveStep::Continue
    })
}
