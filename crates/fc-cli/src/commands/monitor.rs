//! Monitor command: feeds a JSONL location stream into the engine.
//!
//! Each line is either a fix or a provider signal:
//!
//! ```text
//! {"lat": 40.7128, "lon": -74.006, "accuracy": 12.0, "timestamp": "2025-01-06T08:00:00Z"}
//! {"signal": "no_fix"}
//! {"signal": "permission_denied"}
//! {"signal": "permission_granted"}
//! ```
//!
//! `accuracy` and `timestamp` are optional; a missing timestamp means now.
//! Invalid lines are logged and skipped. The monitor stops at end of input
//! once every queued update has been processed.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;

use fc_core::LocationSample;
use fc_engine::{ChannelProvider, Engine, ProviderEvent};

/// Queued updates before the reader waits for the monitor.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StreamLine {
    Signal {
        signal: Signal,
    },
    Fix {
        lat: f64,
        lon: f64,
        #[serde(default)]
        accuracy: f64,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Signal {
    NoFix,
    PermissionDenied,
    PermissionGranted,
}

fn parse_line(line: &str) -> Result<ProviderEvent> {
    let parsed: StreamLine = serde_json::from_str(line).context("unrecognized stream line")?;
    Ok(match parsed {
        StreamLine::Signal { signal } => match signal {
            Signal::NoFix => ProviderEvent::NoFix,
            Signal::PermissionDenied => ProviderEvent::PermissionDenied,
            Signal::PermissionGranted => ProviderEvent::PermissionGranted,
        },
        StreamLine::Fix {
            lat,
            lon,
            accuracy,
            timestamp,
        } => ProviderEvent::Sample(LocationSample::new(
            timestamp.unwrap_or_else(Utc::now),
            lat,
            lon,
            accuracy,
        )?),
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FeedSummary {
    sent: usize,
    skipped: usize,
}

/// Reads lines until EOF. Runs on a blocking thread.
fn feed<R: BufRead>(reader: R, sender: &mpsc::Sender<ProviderEvent>) -> Result<FeedSummary> {
    let mut summary = FeedSummary::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("failed to read location stream")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(event) => {
                if sender.blocking_send(event).is_err() {
                    tracing::warn!("location monitor stopped before end of input");
                    break;
                }
                summary.sent += 1;
            }
            Err(err) => {
                tracing::warn!(line = index + 1, error = %err, "skipping stream line");
                summary.skipped += 1;
            }
        }
    }
    Ok(summary)
}

pub async fn run<R, W>(reader: R, writer: &mut W, engine: &Engine) -> Result<()>
where
    R: BufRead + Send + 'static,
    W: Write,
{
    let (provider, sender) = ChannelProvider::new(CHANNEL_CAPACITY);
    engine
        .start(&provider)
        .await
        .context("failed to start location monitor")?;

    let fed = tokio::task::spawn_blocking(move || feed(reader, &sender))
        .await
        .context("stream reader failed");
    // The sender is gone once the reader returns, so the monitor drains and exits.
    engine.wait().await;
    let summary = fed??;

    writeln!(
        writer,
        "Processed {} updates ({} skipped).",
        summary.sent, summary.skipped
    )?;
    super::status::run(writer, engine).await
}
