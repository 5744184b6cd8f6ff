// ── Transport abstraction ──
//
// A transport turns a URL into a stream of lifecycle signals and raw
// message payloads. The connector never sees HTTP; tests substitute a
// channel-backed transport.

mod sse;

use std::path::PathBuf;
use std::time::Duration;

use futures_util::stream::BoxStream;
use url::Url;

use crate::error::Error;

pub use sse::{SseDecoder, SseMessage, SseTransport};

/// Signals produced by an open transport, in arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is established and the server accepted the stream.
    Open,
    /// One raw message payload.
    Message(String),
    /// The connection failed. No further events follow.
    Failed(Error),
    /// The server ended the stream. No further events follow.
    Closed,
}

/// A server-push connection primitive.
///
/// `open` must not block: it returns a lazy stream that connects when first
/// polled. Dropping the stream closes the connection.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &Url) -> BoxStream<'static, TransportEvent>;
}

// ── HTTP client configuration ────────────────────────────────────────

/// TLS verification mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (local development backends).
    DangerAcceptInvalid,
}

/// Settings for building the HTTP client behind [`SseTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Bound on establishing the TCP/TLS connection. The stream body itself
    /// has no timeout since it stays open for the life of the workflow.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!("xrisk-stream/", env!("CARGO_PKG_VERSION")));

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_a_client() {
        assert!(TransportConfig::default().build_client().is_ok());
    }

    #[test]
    fn missing_ca_file_is_a_tls_error() {
        let config = TransportConfig {
            tls: TlsMode::CustomCa("/nonexistent/xrisk-ca.pem".into()),
            ..TransportConfig::default()
        };
        let err = config.build_client().unwrap_err();
        assert!(matches!(err, Error::Tls(ref msg) if msg.contains("failed to read CA cert")));
    }
}
