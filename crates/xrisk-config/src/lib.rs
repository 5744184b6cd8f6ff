//! Shared configuration for xrisk stream tools.
//!
//! TOML profiles merged with `XRISK_` environment variables, and
//! translation to `xrisk_stream::ConnectorConfig` / `TransportConfig`.
//! The CLI layers its flag overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use xrisk_stream::{ConnectorConfig, ReconnectPolicy, TlsMode, TransportConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is requested.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Reconnect policy shared by every profile.
    #[serde(default)]
    pub reconnect: ReconnectSettings,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            reconnect: ReconnectSettings::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Resolve which profile name applies: explicit request, then
    /// `default_profile`, then `"default"`.
    pub fn active_profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn default_output() -> String {
    "plain".into()
}
fn default_connect_timeout() -> u64 {
    10
}

/// `[reconnect]` table. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    #[serde(default = "default_delay_max_ms")]
    pub delay_max_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            delay_max_ms: default_delay_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            auto_reconnect: default_auto_reconnect(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_delay_ms() -> u64 {
    2000
}
fn default_delay_max_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    1.5
}
fn default_heartbeat_timeout_ms() -> u64 {
    30_000
}
fn default_auto_reconnect() -> bool {
    true
}

/// A named backend profile.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Backend base URL (e.g., "https://api.xrisk.example").
    pub base_url: String,

    /// Accept self-signed certificates.
    pub insecure: Option<bool>,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override the connect timeout (seconds).
    pub connect_timeout: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "xrisk", "xrisk").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("xrisk");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from a specific file, merged with `XRISK_` environment variables.
///
/// Nested keys use a double underscore: `XRISK_RECONNECT__MAX_ATTEMPTS=3`.
/// A missing file is not an error.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("XRISK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation to runtime config ───────────────────────────────────

/// Build a validated `ReconnectPolicy` from the `[reconnect]` table.
pub fn reconnect_policy(settings: &ReconnectSettings) -> Result<ReconnectPolicy, ConfigError> {
    let policy = ReconnectPolicy {
        max_attempts: settings.max_attempts,
        initial_delay: Duration::from_millis(settings.delay_ms),
        max_delay: Duration::from_millis(settings.delay_max_ms),
        multiplier: settings.backoff_multiplier,
        heartbeat_timeout: Duration::from_millis(settings.heartbeat_timeout_ms),
        auto_reconnect: settings.auto_reconnect,
    };

    policy.validate().map_err(|e| ConfigError::Validation {
        field: "reconnect".into(),
        reason: e.to_string(),
    })?;
    Ok(policy)
}

/// Parse a base URL, accepting only http(s).
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url: Url = raw.parse().map_err(|e| ConfigError::Validation {
        field: "base_url".into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "base_url".into(),
            reason: format!("expected http or https, got '{}'", url.scheme()),
        });
    }
    Ok(url)
}

/// Build a `ConnectorConfig` from a profile and the shared reconnect table.
pub fn profile_to_connector_config(
    profile: &Profile,
    cfg: &Config,
) -> Result<ConnectorConfig, ConfigError> {
    let base_url = parse_base_url(&profile.base_url)?;
    let policy = reconnect_policy(&cfg.reconnect)?;
    Ok(ConnectorConfig::new(base_url).with_policy(policy))
}

/// Build the HTTP transport settings for a profile.
pub fn profile_to_transport_config(profile: &Profile, cfg: &Config) -> TransportConfig {
    let tls = if profile.insecure.unwrap_or(false) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    TransportConfig {
        tls,
        connect_timeout: Duration::from_secs(
            profile
                .connect_timeout
                .unwrap_or(cfg.defaults.connect_timeout),
        ),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
