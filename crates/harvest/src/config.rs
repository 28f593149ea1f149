//! Configuration loading for the exporter
//!
//! Supports loading settings from (in order of priority):
//! 1. An explicit JSON file (`--config`)
//! 2. JSON file in the config directory (~/.config/harvest/harvest.json)
//! 3. Runtime environment variables (fallback)

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::airtable::AirtableClient;
use crate::storage::AttachmentDir;
use crate::sync::{ConcurrencyLimits, RetryPolicy, ScanSettings};

/// Config filename in the harvest config directory
const CONFIG_FILE: &str = "harvest.json";

/// Default database filename, placed in the config directory
const DATABASE_FILE: &str = "harvest.db";

/// Exporter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Personal access token with enterprise admin scopes
    pub api_token: String,
    /// Enterprise accounts to crawl, in order
    pub account_ids: Vec<String>,
    /// Principal granted temporary read access to each scanned base
    pub admin_user_id: String,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Attachment extraction is enabled when set
    #[serde(default)]
    pub attachments_dir: Option<PathBuf>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub concurrency: ConcurrencyLimits,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_api_base_url() -> String {
    AirtableClient::DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl HarvestConfig {
    /// Load settings using the following priority:
    /// 1. `explicit` file, when given
    /// 2. JSON file (~/.config/harvest/harvest.json)
    /// 3. Runtime environment variables
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = if let Some(path) = explicit {
            Self::from_file(path)?
        } else if config::config_exists(CONFIG_FILE) {
            config::load_json(CONFIG_FILE)?
        } else {
            Self::from_env()?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load settings from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Parse settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse config JSON")
    }

    /// Load settings from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_token =
            lookup("HARVEST_API_TOKEN").context("HARVEST_API_TOKEN environment variable not set")?;
        let account_ids = lookup("HARVEST_ACCOUNT_IDS")
            .context("HARVEST_ACCOUNT_IDS environment variable not set")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        let admin_user_id = lookup("HARVEST_ADMIN_USER_ID")
            .context("HARVEST_ADMIN_USER_ID environment variable not set")?;

        Ok(Self {
            api_token,
            account_ids,
            admin_user_id,
            database_path: lookup("HARVEST_DATABASE").map(PathBuf::from),
            attachments_dir: lookup("HARVEST_ATTACHMENTS_DIR").map(PathBuf::from),
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            concurrency: ConcurrencyLimits::default(),
            retry: RetryPolicy::default(),
        })
    }

    /// Reject settings the exporter cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.api_token.trim().is_empty() {
            bail!("api_token must not be empty");
        }
        if self.account_ids.is_empty() {
            bail!("account_ids must list at least one account");
        }
        if self.admin_user_id.trim().is_empty() {
            bail!("admin_user_id must not be empty");
        }
        let limits = &self.concurrency;
        if limits.workspaces == 0 || limits.base_metadata == 0 || limits.bases == 0 || limits.tables == 0
        {
            bail!("concurrency limits must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Database location; defaults to harvest.db in the config directory
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            config::config_path(DATABASE_FILE).unwrap_or_else(|| PathBuf::from(DATABASE_FILE))
        })
    }

    /// Where the last run is recorded; one file per database
    pub fn last_run_path(&self) -> PathBuf {
        self.database_path().with_extension("last_run.json")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build an HTTP client from these settings
    pub fn client(&self) -> Result<AirtableClient> {
        AirtableClient::new(&self.api_base_url, self.api_token.clone(), self.request_timeout())
    }

    /// Scan settings, creating the attachment directory when configured
    pub fn scan_settings(&self) -> Result<ScanSettings> {
        let mut settings = ScanSettings::new(self.admin_user_id.clone())
            .with_limits(self.concurrency)
            .with_retry(self.retry);
        if let Some(dir) = &self.attachments_dir {
            settings = settings.with_attachments(AttachmentDir::new(dir)?);
        }
        Ok(settings)
    }

    /// Get the default config file path (~/.config/harvest/harvest.json)
    pub fn default_config_path() -> Option<PathBuf> {
        config::config_path(CONFIG_FILE)
    }
}
