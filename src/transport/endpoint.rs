//! Endpoint resolution: which network location a base URL designates.

use std::path::PathBuf;

use percent_encoding::percent_decode_str;
use url::Url;

use super::error::TransportError;

/// Origin of requests sent through a local socket.
const LOCAL_SOCKET_ORIGIN: &str = "http://localhost/";

/// A connectable network location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP host and port, optionally wrapped in TLS.
    Tcp {
        /// Host name or address literal.
        host: String,
        /// Port, defaulted from the scheme when absent.
        port: u16,
        /// Whether the connection is TLS-protected.
        tls: bool,
    },
    /// Local named socket.
    Unix {
        /// Decoded filesystem path.
        path: PathBuf,
    },
}

impl Endpoint {
    /// Resolve the endpoint a URL designates.
    ///
    /// `http` and `ws` resolve to plain TCP (port 80 by default), `https` and
    /// `wss` to TLS (port 443 by default). `unix://<url-encoded path>/...`
    /// resolves to the socket path carried, percent-encoded, in the host part.
    pub fn resolve(url: &Url) -> Result<Self, TransportError> {
        match url.scheme() {
            "http" | "ws" => Self::tcp(url, false),
            "https" | "wss" => Self::tcp(url, true),
            "unix" => {
                let encoded = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| TransportError::Endpoint(format!("missing socket path in {url}")))?;
                let path = percent_decode_str(encoded)
                    .decode_utf8()
                    .map_err(|e| TransportError::Endpoint(format!("bad socket path in {url}: {e}")))?;
                Ok(Endpoint::Unix {
                    path: PathBuf::from(path.as_ref()),
                })
            }
            other => Err(TransportError::Endpoint(format!("unsupported scheme {other:?}"))),
        }
    }

    fn tcp(url: &Url, tls: bool) -> Result<Self, TransportError> {
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::Endpoint(format!("missing host in {url}")))?;
        let default_port = if tls { 443 } else { 80 };
        Ok(Endpoint::Tcp {
            host: host.to_string(),
            port: url.port().unwrap_or(default_port),
            tls,
        })
    }

    /// Check if the endpoint is TLS-protected.
    pub fn is_tls(&self) -> bool {
        matches!(self, Endpoint::Tcp { tls: true, .. })
    }

    /// The HTTP URL polling requests are sent to.
    ///
    /// `ws` and `wss` map to `http` and `https`. A local socket keeps the
    /// path and query of `url` under `http://localhost`; the client must be
    /// routed to the socket separately.
    pub fn polling_url(url: &Url) -> Result<Url, TransportError> {
        let scheme = match Self::resolve(url)? {
            Endpoint::Tcp { tls: false, .. } => "http",
            Endpoint::Tcp { tls: true, .. } => "https",
            Endpoint::Unix { .. } => {
                let mut polling = Url::parse(LOCAL_SOCKET_ORIGIN)?;
                polling.set_path(url.path());
                polling.set_query(url.query());
                return Ok(polling);
            }
        };

        let mut polling = url.clone();
        if polling.scheme() != scheme {
            polling
                .set_scheme(scheme)
                .map_err(|()| TransportError::Endpoint(format!("cannot poll {url}")))?;
        }
        Ok(polling)
    }
}
