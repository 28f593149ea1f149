//! Base model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ScanId;

/// A base and its scan bookkeeping
///
/// `scan_id` only ever moves to the current run's identifier after every
/// table of the base was written without error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Base {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub created_time: DateTime<Utc>,
    /// When the base was last fully scanned
    pub scan_time: Option<DateTime<Utc>>,
    /// Identifier of the last run that fully scanned the base
    pub scan_id: Option<ScanId>,
}

impl Base {
    /// Create an unscanned base as discovered by the crawler
    pub fn discovered(
        id: impl Into<String>,
        workspace_id: impl Into<String>,
        name: impl Into<String>,
        created_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            name: name.into(),
            created_time,
            scan_time: None,
            scan_id: None,
        }
    }

    /// Whether this base already carries the given run's tag
    pub fn is_scanned_in(&self, scan_id: &ScanId) -> bool {
        self.scan_id.as_ref() == Some(scan_id)
    }

    /// Tag with a completed scan
    pub fn mark_scanned(&mut self, scan_id: ScanId, at: DateTime<Utc>) {
        self.scan_id = Some(scan_id);
        self.scan_time = Some(at);
    }
}
