//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use chrono::TimeDelta;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use fc_core::{CompanyId, ProjectId, RegionScope, UserId};
use fc_engine::{DEFAULT_AUDIT_RETENTION, EngineConfig};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Worker identity. Defaults to the host name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub company_id: String,
    /// Restricts monitoring to the regions of one project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub cache_ttl_secs: u64,
    pub persistence_timeout_ms: u64,
    /// Seconds a changed membership must persist before it counts. 0 disables.
    pub dwell_secs: u64,
    /// Audit events kept per user. 0 keeps everything.
    pub audit_retention: usize,
    /// Endpoint receiving entry and exit alerts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("user_id", &self.user_id)
            .field("company_id", &self.company_id)
            .field("project_id", &self.project_id)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("persistence_timeout_ms", &self.persistence_timeout_ms)
            .field("dwell_secs", &self.dwell_secs)
            .field("audit_retention", &self.audit_retention)
            .field("webhook_url", &self.webhook_url.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("fieldclock.db"),
            user_id: None,
            company_id: "default".to_string(),
            project_id: None,
            cache_ttl_secs: 30,
            persistence_timeout_ms: 5000,
            dwell_secs: 0,
            audit_retention: DEFAULT_AUDIT_RETENTION,
            webhook_url: None,
        }
    }
}

impl Config {
    /// Loads configuration from default locations, optionally merging a
    /// specific file on top.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // FC_COMPANY_ID, FC_WEBHOOK_URL, ...
        figment = figment.merge(Env::prefixed("FC_"));

        figment.extract()
    }

    /// The configured worker, or the host name when none is set.
    pub fn user_id(&self) -> Result<UserId> {
        let raw = match self.user_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => hostname::get()
                .context("failed to read host name")?
                .to_string_lossy()
                .into_owned(),
        };
        UserId::new(raw).context("invalid user_id")
    }

    pub fn scope(&self) -> Result<RegionScope> {
        let company_id = CompanyId::new(self.company_id.as_str()).context("invalid company_id")?;
        Ok(match self.project_id.as_deref() {
            Some(project) => RegionScope::project(
                company_id,
                ProjectId::new(project).context("invalid project_id")?,
            ),
            None => RegionScope::company(company_id),
        })
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::new(self.user_id()?, self.scope()?);
        config.cache_ttl = Duration::from_secs(self.cache_ttl_secs);
        ensure!(
            self.persistence_timeout_ms > 0,
            "persistence_timeout_ms must be greater than zero"
        );
        config.persistence_timeout = Duration::from_millis(self.persistence_timeout_ms);
        config.dwell = i64::try_from(self.dwell_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .context("dwell_secs is too large")?;
        Ok(config)
    }

    /// Directory holding the database and the ingest lock.
    pub fn data_dir(&self) -> &Path {
        self.database_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

/// Returns the platform-specific config directory.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("fieldclock"))
}

/// Returns the platform-specific data directory.
///
/// On Linux: `~/.local/share/fieldclock`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("fieldclock"))
}
