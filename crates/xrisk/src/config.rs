//! CLI configuration: thin wrapper around `xrisk_config`.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--base-url, --insecure, --max-attempts, --no-reconnect).

use xrisk_stream::{ConnectorConfig, TlsMode, TransportConfig};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;

pub use xrisk_config::{Config, Profile, config_path, load_config, save_config};

/// Everything `watch` needs to build a connector.
#[derive(Debug)]
pub struct Resolved {
    pub connector: ConnectorConfig,
    pub transport: TransportConfig,
}

/// Output format: flag > env > config `[defaults].output` > plain.
pub fn output_format(global: &GlobalOpts, cfg: &Config) -> OutputFormat {
    use clap::ValueEnum;

    global.output.unwrap_or_else(|| {
        OutputFormat::from_str(&cfg.defaults.output, true).unwrap_or(OutputFormat::Plain)
    })
}

/// Pick the profile to use, or synthesize one from `--base-url` alone.
fn select_profile(global: &GlobalOpts, cfg: &Config) -> Result<Profile, CliError> {
    let name = cfg.active_profile_name(global.profile.as_deref());

    if let Some(profile) = cfg.profile(&name) {
        let mut profile = profile.clone();
        if let Some(ref url) = global.base_url {
            profile.base_url.clone_from(url);
        }
        return Ok(profile);
    }

    if let Some(ref url) = global.base_url {
        return Ok(Profile {
            base_url: url.clone(),
            insecure: None,
            ca_cert: None,
            connect_timeout: None,
        });
    }

    // Only an explicitly requested profile is reported as missing.
    if global.profile.is_some() {
        let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
        available.sort();
        return Err(CliError::ProfileNotFound {
            name,
            available: if available.is_empty() {
                "(none)".into()
            } else {
                available.join(", ")
            },
        });
    }

    Err(CliError::NoConfig {
        path: config_path().display().to_string(),
    })
}

/// Translate config + flags into connector and transport settings.
pub fn resolve(global: &GlobalOpts, cfg: &Config) -> Result<Resolved, CliError> {
    let profile = select_profile(global, cfg)?;

    let mut connector = xrisk_config::profile_to_connector_config(&profile, cfg)?;
    if let Some(max) = global.max_attempts {
        connector.policy.max_attempts = max;
    }
    if global.no_reconnect {
        connector.policy.auto_reconnect = false;
    }

    let mut transport = xrisk_config::profile_to_transport_config(&profile, cfg);
    if global.insecure {
        transport.tls = TlsMode::DangerAcceptInvalid;
    }

    Ok(Resolved {
        connector,
        transport,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["xrisk"];
        argv.extend_from_slice(args);
        argv.extend_from_slice(&["watch", "t"]);
        Cli::try_parse_from(argv).unwrap().global
    }

    fn with_profile(name: &str, url: &str) -> Config {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            name.into(),
            Profile {
                base_url: url.into(),
                insecure: None,
                ca_cert: None,
                connect_timeout: None,
            },
        );
        cfg
    }

    #[test]
    fn base_url_flag_works_without_config() {
        let resolved = resolve(
            &global(&["--base-url", "http://localhost:9000"]),
            &Config::default(),
        )
        .unwrap();
        assert_eq!(resolved.connector.base_url.as_str(), "http://localhost:9000/");
    }

    #[test]
    fn flags_override_profile() {
        let cfg = with_profile("default", "https://api.xrisk.example");
        let resolved = resolve(
            &global(&["-k", "--max-attempts", "2", "--no-reconnect"]),
            &cfg,
        )
        .unwrap();

        assert_eq!(resolved.connector.base_url.as_str(), "https://api.xrisk.example/");
        assert_eq!(resolved.connector.policy.max_attempts, 2);
        assert!(!resolved.connector.policy.auto_reconnect);
        assert_eq!(resolved.transport.tls, TlsMode::DangerAcceptInvalid);
    }

    #[test]
    fn missing_named_profile_lists_available() {
        let cfg = with_profile("prod", "https://api.xrisk.example");
        let err = resolve(&global(&["--profile", "staging"]), &cfg).unwrap_err();
        match err {
            CliError::ProfileNotFound { name, available } => {
                assert_eq!(name, "staging");
                assert_eq!(available, "prod");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn nothing_configured_is_no_config() {
        let err = resolve(&global(&[]), &Config::default()).unwrap_err();
        assert!(matches!(err, CliError::NoConfig { .. }));
    }

    #[test]
    fn output_falls_back_to_config_default() {
        let mut cfg = Config::default();
        cfg.defaults.output = "json-compact".into();
        assert_eq!(output_format(&global(&[]), &cfg), OutputFormat::JsonCompact);
        assert_eq!(output_format(&global(&["-o", "json"]), &cfg), OutputFormat::Json);

        cfg.defaults.output = "yaml".into();
        assert_eq!(output_format(&global(&[]), &cfg), OutputFormat::Plain);
    }
}
