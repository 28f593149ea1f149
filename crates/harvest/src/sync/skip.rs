//! Run-scoped skip list

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Step of the per-base lifecycle a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStage {
    Grant,
    Discover,
    Revoke,
    Commit,
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanStage::Grant => "grant",
            ScanStage::Discover => "discover",
            ScanStage::Revoke => "revoke",
            ScanStage::Commit => "commit",
        };
        f.write_str(s)
    }
}

/// Why a base was left untagged this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The administrative principal could not be granted access
    GrantForbidden(String),
    /// A table failed after retries; remaining tables were aborted
    TableFailed { table_id: String, error: String },
    /// Any other failure at the given stage
    Failed { stage: ScanStage, error: String },
    /// The scan task itself died (panic or cancellation)
    Aborted(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::GrantForbidden(e) => write!(f, "grant forbidden: {e}"),
            SkipReason::TableFailed { table_id, error } => {
                write!(f, "table {table_id} failed: {error}")
            }
            SkipReason::Failed { stage, error } => write!(f, "{stage} failed: {error}"),
            SkipReason::Aborted(e) => write!(f, "scan aborted: {e}"),
        }
    }
}

/// Bases that failed to scan fully in the current run
///
/// Cloning shares the underlying list; base scanners each hold a handle and
/// the coordinator reads the final contents once every scan has resolved.
/// Recording the same base twice keeps the first reason.
#[derive(Debug, Clone, Default)]
pub struct SkipList {
    entries: Arc<Mutex<BTreeMap<String, SkipReason>>>,
}

impl SkipList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, base_id: impl Into<String>, reason: SkipReason) {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(base_id.into()).or_insert(reason);
    }

    pub fn contains(&self, base_id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(base_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn base_ids(&self) -> HashSet<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    /// Snapshot of (base id, reason), ordered by base id
    pub fn entries(&self) -> Vec<(String, SkipReason)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(id, reason)| (id.clone(), reason.clone()))
            .collect()
    }
}
