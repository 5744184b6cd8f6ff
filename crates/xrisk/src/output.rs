//! Output formatting: plain, JSON, compact JSON.
//!
//! Workflow events go to stdout in the format selected by `--output`.
//! Connection status lines go to stderr so stdout stays parseable.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;

use xrisk_stream::{ConnectionStatus, WorkflowEvent};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stderr().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// Render one workflow event.
pub fn render_event(
    format: OutputFormat,
    event: &WorkflowEvent,
    color: bool,
) -> Result<String, CliError> {
    Ok(match format {
        OutputFormat::Plain => render_event_plain(event, color),
        OutputFormat::Json => serde_json::to_string_pretty(event)?,
        OutputFormat::JsonCompact => serde_json::to_string(event)?,
    })
}

/// `HH:MM:SS  status  [step]  42%  message`, skipping absent fields.
fn render_event_plain(event: &WorkflowEvent, color: bool) -> String {
    let mut parts = vec![timestamp()];

    let status = event.status().unwrap_or("update");
    parts.push(if color {
        status.bold().to_string()
    } else {
        status.to_owned()
    });

    if let Some(step) = event.step() {
        parts.push(format!("[{step}]"));
    }
    if let Some(progress) = event.progress() {
        parts.push(format!("{progress:.0}%"));
    }
    if let Some(message) = event.message() {
        parts.push(message.to_owned());
    }

    parts.join("  ")
}

// ── Status ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatusRecord<'a> {
    status: ConnectionStatus,
    task_id: &'a str,
    at: String,
}

/// Render a connection status transition for stderr.
pub fn render_status(
    format: OutputFormat,
    status: ConnectionStatus,
    task_id: &str,
    color: bool,
) -> Result<String, CliError> {
    if format != OutputFormat::Plain {
        let record = StatusRecord {
            status,
            task_id,
            at: chrono::Utc::now().to_rfc3339(),
        };
        return Ok(serde_json::to_string(&record)?);
    }

    let label = format!("● {status}");
    let label = if color {
        match status {
            ConnectionStatus::Connected => label.green().to_string(),
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => {
                label.yellow().to_string()
            }
            ConnectionStatus::Error => label.red().to_string(),
            ConnectionStatus::Closed => label.cyan().to_string(),
            ConnectionStatus::Disconnected => label.dimmed().to_string(),
        }
    } else {
        label
    };

    Ok(format!("{}  {label}  {task_id}", timestamp()))
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

// ── Writers ──────────────────────────────────────────────────────────

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
    let _ = stdout.flush();
}

/// Print a diagnostic line to stderr, respecting quiet mode.
pub fn print_status(line: &str, quiet: bool) {
    if quiet {
        return;
    }
    let _ = writeln!(io::stderr().lock(), "{line}");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(value: serde_json::Value) -> WorkflowEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn plain_event_includes_known_fields() {
        let e = event(json!({
            "task_id": "t1",
            "meta": {"status": "researched", "step": "search", "progress": 42, "message": "found 3 sources"}
        }));
        let line = render_event(OutputFormat::Plain, &e, false).unwrap();
        assert!(line.ends_with("researched  [search]  42%  found 3 sources"), "{line}");
    }

    #[test]
    fn plain_event_without_status() {
        let line = render_event(OutputFormat::Plain, &event(json!({"foo": 1})), false).unwrap();
        assert!(line.ends_with("  update"), "{line}");
    }

    #[test]
    fn compact_json_is_the_raw_payload() {
        let e = event(json!({"meta": {"status": "classified"}}));
        assert_eq!(
            render_event(OutputFormat::JsonCompact, &e, false).unwrap(),
            r#"{"meta":{"status":"classified"}}"#
        );
    }

    #[test]
    fn status_lines() {
        let plain = render_status(OutputFormat::Plain, ConnectionStatus::Reconnecting, "t1", false)
            .unwrap();
        assert!(plain.ends_with("● reconnecting  t1"), "{plain}");

        let json = render_status(OutputFormat::Json, ConnectionStatus::Closed, "t1", false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "closed");
        assert_eq!(value["task_id"], "t1");
    }
}
