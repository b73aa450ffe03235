//! Ingest command for processing a single location sample.
//!
//! Each invocation is its own process, so the membership state is restored
//! from storage every time. An exclusive lock on the data directory keeps
//! concurrent invocations from interleaving their transitions.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;

use fc_core::LocationSample;
use fc_engine::Engine;

use super::util::parse_optional_datetime;

/// Returns the path to the lock file within the given data directory.
fn lock_path(data_dir: &Path) -> PathBuf {
    data_dir.join(".lock")
}

/// Blocks until this process holds the data directory lock. The lock is
/// released when the returned file is dropped.
fn acquire_lock(data_dir: &Path) -> Result<File> {
    fs::create_dir_all(data_dir).context("failed to create data directory")?;
    let lock_file = File::create(lock_path(data_dir)).context("failed to create lock file")?;
    lock_file
        .lock_exclusive()
        .context("failed to acquire lock")?;
    Ok(lock_file)
}

/// Builds a sample from command-line values, stamped now unless `at` is given.
pub fn sample_from_args(
    lat: f64,
    lon: f64,
    accuracy: f64,
    at: Option<&str>,
) -> Result<LocationSample> {
    let timestamp = parse_optional_datetime(at)?.unwrap_or_else(Utc::now);
    LocationSample::new(timestamp, lat, lon, accuracy).context("invalid location sample")
}

pub async fn run<W: Write>(
    writer: &mut W,
    engine: &Engine,
    data_dir: &Path,
    sample: &LocationSample,
    json: bool,
) -> Result<()> {
    let dir = data_dir.to_path_buf();
    let _lock = tokio::task::spawn_blocking(move || acquire_lock(&dir))
        .await
        .context("lock task failed")??;

    let reports = engine.process_sample(sample).await?;
    tracing::debug!(transitions = reports.len(), "sample processed");

    if json {
        writeln!(writer, "{}", serde_json::to_string(&reports)?)?;
        return Ok(());
    }

    if reports.is_empty() {
        writeln!(writer, "No transition.")?;
    }
    for report in &reports {
        writeln!(writer, "{} {}: {}", report.kind, report.region_id, report.outcome)?;
    }
    Ok(())
}
