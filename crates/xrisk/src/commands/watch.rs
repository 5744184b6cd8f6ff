//! `xrisk watch`: follow one task's stream until it settles.

use tokio::sync::watch;

use xrisk_stream::{ConnectionStatus, SseTransport, StreamConnector};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

pub async fn handle(
    args: WatchArgs,
    resolved: Resolved,
    format: OutputFormat,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let url = resolved.connector.stream_url(&args.task_id)?.to_string();
    let transport = SseTransport::new(&resolved.transport)?;
    let connector = StreamConnector::new(resolved.connector, transport)?;

    let color = output::should_color(global.color);
    let quiet = global.quiet;

    let _events = connector.on_event(move |event| {
        match output::render_event(format, event, color) {
            Ok(line) => output::print_output(&line, quiet),
            Err(e) => tracing::warn!(error = %e, "failed to render event"),
        }
    });

    let task_id = args.task_id.clone();
    let _statuses = connector.on_status_change(move |status| {
        if *status == ConnectionStatus::Disconnected {
            return;
        }
        match output::render_status(format, *status, &task_id, color) {
            Ok(line) => output::print_status(&line, quiet),
            Err(e) => tracing::warn!(error = %e, "failed to render status"),
        }
    });

    let mut status_rx = connector.watch_status();
    connector.connect(&args.task_id)?;
    tracing::debug!(task_id = %args.task_id, %url, "watching task");

    let interrupted = tokio::select! {
        () = wait_until_settled(&connector, &mut status_rx) => false,
        _ = tokio::signal::ctrl_c() => true,
    };

    let final_status = connector.status();
    let attempts = connector.reconnect_attempts();
    connector.destroy();

    if interrupted {
        tracing::info!(task_id = %args.task_id, "interrupted, stream closed");
        return Ok(());
    }

    match final_status {
        ConnectionStatus::Error => Err(CliError::ConnectionLost {
            task_id: args.task_id,
            url,
            attempts,
        }),
        _ => Ok(()),
    }
}

/// Resolve once the connector has stopped on its own.
async fn wait_until_settled(
    connector: &StreamConnector,
    status_rx: &mut watch::Receiver<ConnectionStatus>,
) {
    while !connector.is_settled() {
        if status_rx.changed().await.is_err() {
            break;
        }
    }
}
