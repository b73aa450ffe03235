//! CLI subcommand implementations.

pub mod audit;
pub mod clock;
pub mod history;
pub mod ingest;
pub mod monitor;
pub mod region;
pub mod status;
pub mod util;

use std::sync::Arc;

use anyhow::{Context, Result};

use fc_engine::{Engine, LogNotifier, Notifier, SqliteStore, WebhookNotifier};

use crate::Config;

/// Opens the database and builds an engine for the configured user.
///
/// Alerts go to the webhook when one is configured, otherwise to the log.
pub fn open_engine(config: &Config) -> Result<Engine> {
    std::fs::create_dir_all(config.data_dir()).context("failed to create database directory")?;
    let store = SqliteStore::open(&config.database_path, config.audit_retention)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;

    let notifier: Arc<dyn Notifier> = match config
        .webhook_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
    {
        Some(url) => Arc::new(WebhookNotifier::new(url).context("invalid webhook_url")?),
        None => Arc::new(LogNotifier),
    };

    Ok(Engine::new(
        config.engine_config()?,
        Arc::new(store),
        notifier,
    ))
}
