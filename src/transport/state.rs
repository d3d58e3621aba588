//! Transport state machine.
//!
//! ```text
//!                  ┌──────────────► connected ───┐
//!                  │                             ▼
//! disconnected ─► connecting ─► receiving ─► disconnecting ─► disconnected
//!                  │                             ▲
//!                  └─────────────────────────────┘
//! ```
//!
//! `disconnected` is both the initial state and the end of every cycle; a
//! transport may run through the table any number of times.

use std::fmt;

use parking_lot::Mutex;

use crate::core::StateError;

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// No I/O in progress.
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// New session established; sends are possible.
    Connected,
    /// Session established and the receive loop is running.
    Receiving,
    /// Teardown in progress.
    Disconnecting,
}

impl TransportState {
    /// All states, in lifecycle order.
    pub const ALL: [TransportState; 5] = [
        TransportState::Disconnected,
        TransportState::Connecting,
        TransportState::Connected,
        TransportState::Receiving,
        TransportState::Disconnecting,
    ];

    /// States reachable from this one.
    pub fn successors(self) -> &'static [TransportState] {
        use TransportState::*;
        match self {
            Disconnected => &[Connecting],
            Connecting => &[Connected, Receiving, Disconnecting],
            Connected | Receiving => &[Disconnecting],
            Disconnecting => &[Disconnected],
        }
    }

    /// Check if the transition `self -> next` is in the table.
    pub fn can_transition_to(self, next: TransportState) -> bool {
        self.successors().contains(&next)
    }

    /// Check if a session is established and packets may be sent.
    pub fn is_active(self) -> bool {
        matches!(self, TransportState::Connected | TransportState::Receiving)
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            TransportState::Disconnected => "disconnected",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Receiving => "receiving",
            TransportState::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of one transport, changed only through validated
/// transitions.
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<TransportState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    /// Create a cell in [`TransportState::Disconnected`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TransportState::Disconnected),
        }
    }

    /// Current state.
    pub fn get(&self) -> TransportState {
        *self.state.lock()
    }

    /// Move to `next`. On error the state is unchanged.
    pub fn transition(&self, next: TransportState) -> Result<TransportState, StateError> {
        let mut state = self.state.lock();
        let from = *state;
        if !from.can_transition_to(next) {
            return Err(StateError::InvalidTransition { from, to: next });
        }
        *state = next;
        Ok(from)
    }

    /// Move to `next` only if the current state is `expected`.
    pub fn transition_from(
        &self,
        expected: &[TransportState],
        next: TransportState,
        operation: &'static str,
    ) -> Result<TransportState, StateError> {
        let mut state = self.state.lock();
        let from = *state;
        if !expected.contains(&from) {
            return Err(StateError::NotPermitted {
                operation,
                state: from,
            });
        }
        if !from.can_transition_to(next) {
            return Err(StateError::InvalidTransition { from, to: next });
        }
        *state = next;
        Ok(from)
    }

    /// Fail unless the current state is one of `allowed`.
    pub fn require(
        &self,
        allowed: &[TransportState],
        operation: &'static str,
    ) -> Result<TransportState, StateError> {
        let state = self.get();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(StateError::NotPermitted { operation, state })
        }
    }
}
