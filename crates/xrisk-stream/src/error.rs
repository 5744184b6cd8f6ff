use thiserror::Error;

/// Top-level error type for the `xrisk-stream` crate.
///
/// Only construction and `connect()` preconditions are returned to callers.
/// Transport failures travel inside [`TransportEvent::Failed`](crate::TransportEvent::Failed)
/// and surface to consumers as connection status changes, never as `Err`.
#[derive(Debug, Error)]
pub enum Error {
    // ── Preconditions ───────────────────────────────────────────────
    /// `connect()` was called with an empty task id.
    #[error("Task id must not be empty")]
    EmptyTaskId,

    /// `connect()` was called outside a Tokio runtime.
    #[error("No Tokio runtime available -- connect() must run inside a runtime")]
    NoRuntime,

    // ── Configuration ───────────────────────────────────────────────
    /// The base URL cannot carry path segments (e.g. `mailto:`).
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// A reconnect policy field is out of range.
    #[error("Invalid reconnect policy: {field} {reason}")]
    InvalidPolicy { field: &'static str, reason: String },

    /// TLS setup failed while building the HTTP client.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, body read).
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The stream endpoint answered with a non-success status.
    #[error("Stream endpoint returned HTTP {status}")]
    UnexpectedStatus { status: u16 },

    /// The server ended the stream without a graceful close message.
    #[error("Stream ended by server")]
    StreamEnded,
}

impl Error {
    /// Returns `true` for failures raised by the transport rather than
    /// by configuration or caller preconditions.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::UnexpectedStatus { .. } | Self::StreamEnded
        )
    }
}
