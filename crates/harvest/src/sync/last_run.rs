//! Record of the most recent run, kept next to the database
//!
//! Written when a run starts and again when it finishes, so an
//! interrupted or partially skipped run can be resumed without the
//! caller remembering its scan id.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::coordinator::ScanReport;
use crate::models::ScanId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastRun {
    pub scan_id: ScanId,
    pub started_at: DateTime<Utc>,
    /// Unset while the run is in progress or after it was interrupted
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Bases left untagged, with the reason they were skipped
    #[serde(default)]
    pub skipped: BTreeMap<String, String>,
}

impl LastRun {
    pub fn started(scan_id: ScanId, at: DateTime<Utc>) -> Self {
        Self {
            scan_id,
            started_at: at,
            finished_at: None,
            skipped: BTreeMap::new(),
        }
    }

    pub fn finish(&mut self, report: &ScanReport, at: DateTime<Utc>) {
        self.finished_at = Some(at);
        self.skipped = report
            .skipped
            .iter()
            .map(|(base_id, reason)| (base_id.clone(), reason.to_string()))
            .collect();
    }

    /// Whether resuming this run would have work left
    pub fn is_resumable(&self) -> bool {
        self.finished_at.is_none() || !self.skipped.is_empty()
    }

    /// Load from `path`; a missing file means no run was recorded
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        config::load_json_file(path).map(Some)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        config::save_json_file(path, self)
    }

    /// Scan id a resuming caller should use, if the recorded run is unfinished
    pub fn resume_id(path: &Path) -> Result<Option<ScanId>> {
        Ok(Self::load(path)?
            .filter(LastRun::is_resumable)
            .map(|run| run.scan_id))
    }
}
