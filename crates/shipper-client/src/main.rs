//! Shipper client binary entry point.
//!
//! Usage:
//!   shipper-client publish --input events.ndjson [--batch-size 100]
//!   shipper-client watch

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use shipper_client::{
    init_logging, BackoffScheduler, CheckpointConfig, CheckpointConsumer, CheckpointEvent, Event,
    LogConfig, Reconciler, ShipperConfig, ShipperError, UnixSocketTransport,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Publish events to a local shipper and follow its persisted position.
#[derive(Parser, Debug)]
#[command(name = "shipper-client")]
#[command(about = "Reliable event publishing to a local shipper")]
struct Args {
    /// Path to the shipper socket.
    #[arg(long, env = "SHIPPER_SOCKET", global = true)]
    socket: Option<PathBuf>,

    /// JSON config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write JSONL logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish newline-delimited JSON events, one batch at a time.
    Publish {
        /// NDJSON file, one event per line.
        #[arg(long)]
        input: PathBuf,

        /// Events per batch.
        #[arg(long, default_value = "100")]
        batch_size: usize,
    },
    /// Print persisted position updates until interrupted.
    Watch,
}

/// Parse one NDJSON line: a full event, or a bare object used as its fields.
fn parse_event(line: &str) -> anyhow::Result<Event> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("timestamp").is_some() {
        return Ok(serde_json::from_value(value)?);
    }
    match value {
        Value::Object(fields) => Ok(Event::new(fields)),
        other => bail!("expected a JSON object, got {}", other),
    }
}

fn read_events(path: &Path) -> anyhow::Result<Vec<Event>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            parse_event(line).with_context(|| format!("{}:{}: invalid event", path.display(), n + 1))
        })
        .collect()
}

async fn publish(
    config: &ShipperConfig,
    transport: Arc<UnixSocketTransport>,
    input: &Path,
    batch_size: usize,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if batch_size == 0 {
        bail!("--batch-size must be positive");
    }
    let events = read_events(input)?;
    info!(events = events.len(), batch_size, "Publishing events");

    let reconciler = Reconciler::new(
        transport,
        BackoffScheduler::new(config.publish_backoff.clone()),
        config.retry.clone(),
    );

    let mut published = 0usize;
    for (batch_no, chunk) in events.chunks(batch_size).enumerate() {
        match reconciler.publish(chunk.to_vec(), &cancel).await {
            Ok(report) => {
                published += chunk.len();
                println!(
                    "{}",
                    json!({
                        "batch": batch_no,
                        "events": report.batch_len,
                        "exchanges": report.exchanges,
                        "backoffs": report.backoffs,
                        "endpoint_id": report.endpoint_id,
                        "last_accepted_index": report.last_accepted_index,
                    })
                );
            }
            Err(ShipperError::Cancelled { offset }) => {
                warn!(
                    batch = batch_no,
                    published = published + offset,
                    "Publishing cancelled"
                );
                return Ok(());
            }
            Err(e) => {
                error!(batch = batch_no, published, error = %e, "Publishing failed");
                return Err(e.into());
            }
        }
    }

    info!(published, "All events accepted");
    Ok(())
}

fn event_json(event: &CheckpointEvent) -> Value {
    match event {
        CheckpointEvent::Established(p) => json!({
            "event": "established",
            "endpoint_id": p.endpoint_id,
            "index": p.index,
        }),
        CheckpointEvent::Advanced(p) => json!({
            "event": "advanced",
            "endpoint_id": p.endpoint_id,
            "index": p.index,
        }),
        CheckpointEvent::EndpointRestarted { previous, current } => json!({
            "event": "endpoint_restarted",
            "previous": previous,
            "current": current,
        }),
        CheckpointEvent::Reconnecting { attempt, delay } => json!({
            "event": "reconnecting",
            "attempt": attempt,
            "delay_ms": delay.as_millis() as u64,
        }),
    }
}

async fn watch(
    config: &ShipperConfig,
    transport: Arc<UnixSocketTransport>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut handle = CheckpointConsumer::spawn(
        transport,
        BackoffScheduler::new(config.reconnect_backoff.clone()),
        CheckpointConfig::from(config),
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                handle.cancel().await;
                if let Some(position) = handle.latest() {
                    info!(endpoint_id = %position.endpoint_id, index = position.index, "Last persisted position");
                }
                return Ok(());
            }
            next = handle.recv() => match next {
                Some(Ok(event)) => println!("{}", event_json(&event)),
                Some(Err(e)) => {
                    error!(error = %e, "Checkpoint stream ended");
                    return Err(e.into());
                }
                None => return Ok(()),
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ShipperConfig::load(args.config.as_deref())?;
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    init_logging(&LogConfig {
        default_level: config.log_level.clone(),
        log_path: args.log_file,
        ..Default::default()
    })?;

    info!(
        socket = %config.socket_path.display(),
        timeout_secs = config.request_timeout_secs,
        "Configuration loaded"
    );

    let transport = Arc::new(UnixSocketTransport::new(
        config.socket_path.clone(),
        config.request_timeout(),
    ));

    // Ctrl-C cancels whatever is running; the command decides how to stop.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            on_signal.cancel();
        }
    });

    match args.command {
        Command::Publish { input, batch_size } => {
            publish(&config, transport, &input, batch_size, cancel).await
        }
        Command::Watch => watch(&config, transport, cancel).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn bare_objects_become_event_fields() {
        let event = parse_event(r#"{"message": "hello", "level": "info"}"#).unwrap();
        assert_eq!(event.fields["message"], "hello");
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn full_events_are_kept_as_is() {
        let line = r#"{"timestamp":"2024-01-02T03:04:05Z","fields":{"n":1}}"#;
        let event = parse_event(line).unwrap();
        assert_eq!(event.timestamp.to_rfc3339(), "2024-01-02T03:04:05+00:00");
        assert_eq!(event.fields["n"], 1);
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(parse_event("[1, 2]").is_err());
        assert!(parse_event("not json").is_err());
    }

    #[test]
    fn read_events_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"a": 1}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"a": 2}}"#).unwrap();

        let events = read_events(file.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].fields["a"], 2);
    }

    #[test]
    fn cli_parses_publish() {
        let args = Args::try_parse_from([
            "shipper-client",
            "--socket",
            "/tmp/s.sock",
            "publish",
            "--input",
            "events.ndjson",
            "--batch-size",
            "10",
        ])
        .unwrap();

        assert_eq!(args.socket, Some(PathBuf::from("/tmp/s.sock")));
        match args.command {
            Command::Publish { input, batch_size } => {
                assert_eq!(input, PathBuf::from("events.ndjson"));
                assert_eq!(batch_size, 10);
            }
            Command::Watch => panic!("expected publish"),
        }
    }
}
