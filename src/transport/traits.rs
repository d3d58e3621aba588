//! The contract every transport satisfies.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::config::TransportConfig;
use super::error::TransportError;
use super::packet::{PacketData, PacketType};
use super::state::TransportState;
use crate::core::{SessionContext, StateError};
use crate::dispatch::Dispatcher;

/// Arguments of a transport event: the packet data, if any.
pub type PacketEvent = Option<PacketData>;

/// Future settling when a transport operation's background work is done.
///
/// The work itself runs on a spawned task, so dropping a completion does not
/// cancel it.
pub type Completion<T> = BoxFuture<'static, Result<T, TransportError>>;

/// A transport: moves packets between this client and one server session.
///
/// State preconditions are checked synchronously; a violation returns a
/// [`StateError`] and has no side effect.
///
/// | operation       | allowed in                 | ends in                    |
/// |-----------------|----------------------------|----------------------------|
/// | [`connect`]     | `disconnected`             | `connected` or `receiving` |
/// | [`standby`]     | `connected`, `receiving`   | `disconnected`             |
/// | [`disconnect`]  | `connected`, `receiving`   | `disconnected`             |
/// | [`send_packet`] | `connected`, `receiving`   | unchanged                  |
///
/// Received packets are dispatched on [`events`](Self::events) under their
/// packet name (`"message"`, `"ping"`, ...). A `close` event is dispatched
/// once the session has ended, whether the peer or [`disconnect`] ended it.
///
/// [`connect`]: Self::connect
/// [`standby`]: Self::standby
/// [`disconnect`]: Self::disconnect
/// [`send_packet`]: Self::send_packet
pub trait Transport: Send + Sync + fmt::Debug {
    /// Transport name as offered in a handshake's upgrade list.
    fn name(&self) -> &'static str;

    /// Current state.
    fn state(&self) -> TransportState;

    /// Dispatcher of received packets.
    fn events(&self) -> &Dispatcher<PacketEvent>;

    /// Establish a session, or resume the one `context` carries.
    fn connect(&self, context: Arc<SessionContext>) -> Result<Completion<()>, StateError>;

    /// Stop all I/O but keep the session for a later [`connect`](Self::connect).
    fn standby(&self) -> Result<Completion<()>, StateError>;

    /// End the session: send a best-effort close packet, stop all I/O,
    /// clear the context and dispatch `close`.
    fn disconnect(&self) -> Result<Completion<()>, StateError>;

    /// Queue one packet. The completion settles once it has been sent.
    fn send_packet(
        &self,
        packet_type: PacketType,
        data: Option<PacketData>,
    ) -> Result<Completion<()>, StateError>;
}

/// Builds transports of one kind.
pub trait TransportFactory: Send + Sync + fmt::Debug {
    /// Name of the transports built, matching [`Transport::name`].
    fn name(&self) -> &'static str;

    /// Build a disconnected transport.
    fn build(&self, config: &TransportConfig) -> Arc<dyn Transport>;
}
