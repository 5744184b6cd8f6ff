//! CLI error types with miette diagnostics.
//!
//! Wraps stream and config errors into user-facing errors with help text
//! and a process exit code.

use miette::Diagnostic;
use thiserror::Error;

use xrisk_config::ConfigError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Lost the stream for task '{task_id}' after {attempts} reconnect attempt(s)")]
    #[diagnostic(
        code(xrisk::connection_lost),
        help(
            "Check that the backend at {url} is reachable.\n\
             Raise the retry budget with --max-attempts, or use --insecure (-k)\n\
             for a backend with a self-signed certificate."
        )
    )]
    ConnectionLost {
        task_id: String,
        url: String,
        attempts: u32,
    },

    #[error(transparent)]
    #[diagnostic(code(xrisk::stream))]
    Stream(#[from] xrisk_stream::Error),

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(xrisk::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(xrisk::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: xrisk config init --base-url <URL> --profile {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No backend configured")]
    #[diagnostic(
        code(xrisk::no_config),
        help(
            "Pass --base-url (or set XRISK_BASE_URL), or create a config with:\n\
             xrisk config init --base-url <URL>\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(xrisk::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(xrisk::config))]
    Config(#[from] ConfigError),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode JSON output: {0}")]
    #[diagnostic(code(xrisk::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionLost { .. } => exit_code::CONNECTION,
            Self::Stream(err) => match err {
                xrisk_stream::Error::EmptyTaskId
                | xrisk_stream::Error::InvalidBaseUrl(_)
                | xrisk_stream::Error::InvalidPolicy { .. } => exit_code::USAGE,
                xrisk_stream::Error::Tls(_) => exit_code::CONFIG,
                _ if err.is_transport() => exit_code::CONNECTION,
                _ => exit_code::GENERAL,
            },
            Self::Validation { .. } => exit_code::USAGE,
            Self::ProfileNotFound { .. }
            | Self::NoConfig { .. }
            | Self::ConfigExists { .. }
            | Self::Config(_) => exit_code::CONFIG,
            Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}
