//! Engine configuration and builder.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use super::engine::Engine;
use crate::core::Error;
use crate::transport::{PollingTransportFactory, TransportConfig, TransportFactory};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// URL every request is derived from, e.g. `http://host/engine.io/`.
    pub base_url: Url,

    /// Settings of every transport the engine builds.
    pub transport: TransportConfig,

    /// Attempt to move the session to an offered transport after the
    /// handshake.
    pub upgrades_enabled: bool,
}

impl ClientConfig {
    /// Configuration with defaults for everything but the URL.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            transport: TransportConfig::default(),
            upgrades_enabled: true,
        }
    }

    /// Reject settings no engine can run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "{} cannot be used as a base url",
                self.base_url
            )));
        }
        if self.transport.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".into()));
        }
        if self.transport.default_timeout.is_zero() {
            return Err(Error::Config("default_timeout must not be zero".into()));
        }
        Ok(())
    }
}

/// Builder for an [`Engine`].
///
/// ```no_run
/// use std::time::Duration;
/// use sockio::client::ClientBuilder;
///
/// # fn main() -> sockio::Result<()> {
/// let engine = ClientBuilder::parse("http://localhost:3000/engine.io/")?
///     .default_timeout(Duration::from_secs(5))
///     .max_connections(2)
///     .build_engine()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ClientBuilder {
    config: ClientConfig,
    transports: Vec<Arc<dyn TransportFactory>>,
}

impl ClientBuilder {
    /// Create a builder for `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self {
            config: ClientConfig::new(base_url),
            transports: vec![Arc::new(PollingTransportFactory)],
        }
    }

    /// Create a builder for the URL in `base_url`.
    pub fn parse(base_url: &str) -> Result<Self, Error> {
        let url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid url {base_url:?}: {e}")))?;
        Ok(Self::new(url))
    }

    /// Set the deadline used before a session exists.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.default_timeout = timeout;
        self
    }

    /// Set the HTTP connection pool size of each transport.
    pub fn max_connections(mut self, connections: usize) -> Self {
        self.config.transport.max_connections = connections;
        self
    }

    /// Set the retries of a failed handshake.
    pub fn handshake_retries(mut self, retries: u32) -> Self {
        self.config.transport.handshake_retries = retries;
        self
    }

    /// Set the retries of the close packet.
    pub fn close_retries(mut self, retries: u32) -> Self {
        self.config.transport.close_retries = retries;
        self
    }

    /// Enable or disable transport upgrades.
    pub fn upgrades(mut self, enabled: bool) -> Self {
        self.config.upgrades_enabled = enabled;
        self
    }

    /// Register an additional transport kind, available as an upgrade
    /// target.
    pub fn transport(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transports.push(factory);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<ClientConfig, Error> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build an engine with every registered transport kind.
    pub fn build_engine(self) -> Result<Engine, Error> {
        self.config.validate()?;
        Engine::with_transports(self.config, self.transports)
    }
}
