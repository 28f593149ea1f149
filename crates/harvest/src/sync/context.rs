//! Shared dependencies and settings of a scan run

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;
use crate::airtable::AirtableApi;
use crate::storage::{AttachmentDir, ExportStore};

/// In-flight limits for the four fan-out levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyLimits {
    /// Workspace detail fetches per account
    pub workspaces: usize,
    /// Base detail fetches per account
    pub base_metadata: usize,
    /// Bases scanned at once
    pub bases: usize,
    /// Tables scanned at once within one base
    pub tables: usize,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            workspaces: 10,
            base_metadata: 10,
            bases: 2,
            tables: 5,
        }
    }
}

/// Run settings that are not remote or store handles
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Principal granted temporary access to each scanned base
    pub admin_user_id: String,
    /// Attachment extraction is enabled when set
    pub attachments: Option<AttachmentDir>,
    pub limits: ConcurrencyLimits,
    pub retry: RetryPolicy,
}

impl ScanSettings {
    pub fn new(admin_user_id: impl Into<String>) -> Self {
        Self {
            admin_user_id: admin_user_id.into(),
            attachments: None,
            limits: ConcurrencyLimits::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_attachments(mut self, dir: AttachmentDir) -> Self {
        self.attachments = Some(dir);
        self
    }

    pub fn with_limits(mut self, limits: ConcurrencyLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Everything a crawler or scanner task needs, cheap to clone into tasks
#[derive(Clone)]
pub struct ScanContext {
    pub api: Arc<dyn AirtableApi>,
    pub store: Arc<dyn ExportStore>,
    pub settings: Arc<ScanSettings>,
}

impl ScanContext {
    pub fn new(
        api: Arc<dyn AirtableApi>,
        store: Arc<dyn ExportStore>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            api,
            store,
            settings: Arc::new(settings),
        }
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.settings.retry
    }

    pub fn limits(&self) -> &ConcurrencyLimits {
        &self.settings.limits
    }

    /// Run a store operation on the blocking pool
    ///
    /// Store writes are synchronous; this keeps them from stalling the
    /// tasks sharing a runtime worker.
    pub async fn store_op<T, F>(&self, op: F) -> anyhow::Result<T>
    where
        F: FnOnce(&dyn ExportStore) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| anyhow::anyhow!("store task failed: {e}"))?
    }
}
