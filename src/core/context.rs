//! Session context shared between the engine and its active transport.

use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Deserializer};
use url::Url;

/// Parameters negotiated by a successful handshake.
///
/// Deserializes from the JSON body of the `open` packet:
///
/// ```text
/// {"sid": "...", "pingInterval": 25000, "pingTimeout": 5000, "upgrades": ["websocket"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Session {
    /// Server-assigned session identifier.
    #[serde(rename = "sid")]
    pub session_id: String,

    /// Interval between keep-alive pings.
    #[serde(rename = "pingInterval", deserialize_with = "millis")]
    pub ping_interval: Duration,

    /// Deadline for every network operation once the session exists.
    #[serde(rename = "pingTimeout", deserialize_with = "millis")]
    pub ping_timeout: Duration,

    /// Transport names the server is willing to upgrade to.
    #[serde(default)]
    pub upgrades: Vec<String>,
}

impl Session {
    /// Parse the JSON body of an `open` packet.
    pub fn from_handshake(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Shared, mutable record of one logical connection.
///
/// The base URL never changes. The negotiated [`Session`] is either fully
/// present or fully absent: [`set`](Self::set) and [`clear`](Self::clear) are
/// the only mutators and readers never observe a partial update.
#[derive(Debug)]
pub struct SessionContext {
    base_url: Url,
    session: RwLock<Option<Session>>,
}

impl SessionContext {
    /// Create a context without a session.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            session: RwLock::new(None),
        }
    }

    /// URL every request of this connection is derived from.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Replace the session parameters.
    pub fn set(&self, session: Session) {
        *self.session.write() = Some(session);
    }

    /// Forget the session parameters.
    pub fn clear(&self) {
        *self.session.write() = None;
    }

    /// Snapshot of the current session, if any.
    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    /// Check if a session is established.
    pub fn has_session(&self) -> bool {
        self.session.read().is_some()
    }

    /// Current session identifier.
    pub fn session_id(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.session_id.clone())
    }

    /// Negotiated keep-alive interval.
    pub fn ping_interval(&self) -> Option<Duration> {
        self.session.read().as_ref().map(|s| s.ping_interval)
    }

    /// Negotiated operation deadline.
    pub fn ping_timeout(&self) -> Option<Duration> {
        self.session.read().as_ref().map(|s| s.ping_timeout)
    }

    /// Transports offered for upgrade. Empty without a session.
    pub fn upgrades(&self) -> Vec<String> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.upgrades.clone())
            .unwrap_or_default()
    }
}
