//! Named events and acknowledgements over an [`Engine`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tracing::debug;

use super::packet::{MessagePacket, MessageType, decode_message, encode_message};
use crate::client::Engine;
use crate::core::constants::FIRST_ACK_SERIAL;
use crate::core::{Error, MessageError};
use crate::dispatch::{Callback, Dispatcher, fallible};
use crate::transport::{Completion, PacketData, PacketEvent, PacketType};

/// Arguments of a message event: namespace and object.
pub type MessageEvent = (String, Value);

/// Name of the event an acknowledgement with `ack_id` is dispatched under,
/// e.g. `ack-3`.
pub fn ack_event(ack_type: MessageType, ack_id: u64) -> String {
    format!("{}-{ack_id}", ack_type.name())
}

/// Message-layer client.
///
/// Every received message packet is dispatched under its type name
/// (`"event"`, `"ack"`, ...) with `(path, object)`. An acknowledgement is
/// dispatched a second time under [`ack_event`], which is where callbacks
/// passed to [`emit`](Self::emit) wait.
pub struct Socket {
    engine: Engine,
    events: Dispatcher<MessageEvent>,
    ack_serial: AtomicU64,
    subscription: Callback<PacketEvent>,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("engine", &self.engine)
            .field("ack_serial", &self.ack_serial.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Socket {
    /// Decode the messages `engine` receives.
    pub fn new(engine: Engine) -> Self {
        let events: Dispatcher<MessageEvent> = Dispatcher::new();
        let relay = events.clone();
        let subscription = fallible(move |_: &str, data: &PacketEvent| {
            let data = data.as_ref().ok_or(MessageError::Truncated)?;
            let packet = decode_message(data)?;
            let packet_type = packet.packet_type;
            let ack_id = packet.ack_id;
            let args = (packet.path, packet.object);

            relay.dispatch(packet_type.name(), &args);
            if let Some(ack_id) = ack_id.filter(|_| packet_type.is_ack()) {
                relay.dispatch(&ack_event(packet_type, ack_id), &args);
            }
            Ok(())
        });
        engine
            .events()
            .on(PacketType::Message.name(), Arc::clone(&subscription));

        Self {
            engine,
            events,
            ack_serial: AtomicU64::new(FIRST_ACK_SERIAL),
            subscription,
        }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Dispatcher of received message packets.
    pub fn events(&self) -> &Dispatcher<MessageEvent> {
        &self.events
    }

    /// Join the namespace `path`.
    pub fn connect(&self, path: &str) -> Result<Completion<()>, Error> {
        self.send_message(MessageType::Connect, Value::Null, path, None)
    }

    /// Leave the namespace `path`.
    pub fn disconnect(&self, path: &str) -> Result<Completion<()>, Error> {
        self.send_message(MessageType::Disconnect, Value::Null, path, None)
    }

    /// Send the event `event` with `args` on `path`.
    ///
    /// With `ack`, the callback is invoked once with the server's
    /// acknowledgement.
    pub fn emit<I>(
        &self,
        event: &str,
        args: I,
        path: &str,
        ack: Option<Callback<MessageEvent>>,
    ) -> Result<Completion<()>, Error>
    where
        I: IntoIterator<Item = Value>,
    {
        let object = std::iter::once(Value::from(event)).chain(args).collect();
        self.send_message(MessageType::Event, Value::Array(object), path, ack)
    }

    /// Send one message packet.
    ///
    /// Only events can request an acknowledgement. Binary types are not
    /// supported.
    pub fn send_message(
        &self,
        packet_type: MessageType,
        object: Value,
        path: &str,
        ack: Option<Callback<MessageEvent>>,
    ) -> Result<Completion<()>, Error> {
        if packet_type.is_binary() {
            return Err(MessageError::Unsupported(packet_type.name()).into());
        }
        let mut packet = MessagePacket::new(packet_type)
            .with_object(object)
            .with_path(path);

        let pending = match ack {
            Some(callback) => {
                let ack_type = packet_type
                    .ack_type()
                    .ok_or(MessageError::AckNotAllowed(packet_type.name()))?;
                let ack_id = self.ack_serial.fetch_add(1, Ordering::SeqCst);
                let event = ack_event(ack_type, ack_id);
                self.events.once(&event, Arc::clone(&callback));
                packet.ack_id = Some(ack_id);
                Some((event, callback))
            }
            None => None,
        };

        let sent = encode_message(&packet).map_err(Error::from).and_then(|text| {
            self.engine
                .send_packet(PacketType::Message, Some(PacketData::Text(text)))
                .map_err(Error::from)
        });

        match (&sent, pending) {
            (Err(_), Some((event, callback))) => {
                self.events.unregister(&event, &callback, true);
            }
            (Ok(_), Some((event, _))) => debug!(event = %event, "awaiting acknowledgement"),
            _ => {}
        }
        sent
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.engine
            .events()
            .unregister(PacketType::Message.name(), &self.subscription, false);
    }
}
