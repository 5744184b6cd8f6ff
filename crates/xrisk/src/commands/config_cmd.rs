//! Config subcommand handlers.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

/// Format config as TOML-like text for display.
fn format_config(cfg: &Config, active: &str) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# active profile: {active}");
    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "connect_timeout = {}", cfg.defaults.connect_timeout);

    let r = &cfg.reconnect;
    let _ = writeln!(out);
    let _ = writeln!(out, "[reconnect]");
    let _ = writeln!(out, "max_attempts = {}", r.max_attempts);
    let _ = writeln!(out, "delay_ms = {}", r.delay_ms);
    let _ = writeln!(out, "delay_max_ms = {}", r.delay_max_ms);
    let _ = writeln!(out, "backoff_multiplier = {}", r.backoff_multiplier);
    let _ = writeln!(out, "heartbeat_timeout_ms = {}", r.heartbeat_timeout_ms);
    let _ = writeln!(out, "auto_reconnect = {}", r.auto_reconnect);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "base_url = \"{}\"", p.base_url);
        if let Some(insecure) = p.insecure {
            let _ = writeln!(out, "insecure = {insecure}");
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        if let Some(timeout) = p.connect_timeout {
            let _ = writeln!(out, "connect_timeout = {timeout}");
        }
    }

    out
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), false);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            let active = cfg.active_profile_name(global.profile.as_deref());
            let rendered = match config::output_format(global, &cfg) {
                OutputFormat::Plain => format_config(&cfg, &active),
                OutputFormat::Json => serde_json::to_string_pretty(&cfg)?,
                OutputFormat::JsonCompact => serde_json::to_string(&cfg)?,
            };
            output::print_output(rendered.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            let path = config::config_path();
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }

            let base_url = global.base_url.as_deref().ok_or_else(|| CliError::Validation {
                field: "base-url".into(),
                reason: "config init needs --base-url (or XRISK_BASE_URL)".into(),
            })?;
            let url = xrisk_config::parse_base_url(base_url)?;

            let name = global.profile.clone().unwrap_or_else(|| "default".into());
            let profile = Profile {
                base_url: url.to_string(),
                insecure: global.insecure.then_some(true),
                ca_cert: None,
                connect_timeout: None,
            };

            let cfg = Config {
                default_profile: Some(name.clone()),
                profiles: HashMap::from([(name.clone(), profile)]),
                ..Config::default()
            };
            let written = config::save_config(&cfg)?;

            output::print_status(
                &format!("✓ Wrote profile '{name}' to {}", written.display()),
                global.quiet,
            );
            Ok(())
        }
    }
}
