//! Deletion of rows not re-observed by the current run

use std::collections::HashSet;

use anyhow::Result;
use log::{debug, info};

use crate::models::ScanId;
use crate::storage::{EntityKind, ExportStore};

/// What a reconciliation pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub bases_deleted: usize,
    /// Records deleted directly; records removed by a base cascade are not counted
    pub records_deleted: usize,
    /// Stale bases kept because they failed to scan this run
    pub bases_protected: usize,
    pub records_protected: usize,
}

/// Deletes stale bases, then stale records
///
/// A row is stale when its scan id is unset or differs from the current
/// run's. Rows belonging to a protected base are kept: such a base was not
/// re-observed because its scan failed, not because it is gone.
pub struct Reconciler<'a> {
    store: &'a dyn ExportStore,
    protected: &'a HashSet<String>,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn ExportStore, protected: &'a HashSet<String>) -> Self {
        Self { store, protected }
    }

    pub fn run(&self, scan_id: &ScanId) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for kind in [EntityKind::Base, EntityKind::Record] {
            for key in self.store.stale_keys(kind, scan_id)? {
                if self.protected.contains(key.base_id()) {
                    match kind {
                        EntityKind::Base => report.bases_protected += 1,
                        EntityKind::Record => report.records_protected += 1,
                    }
                    continue;
                }

                if self.store.delete_entity(&key)? {
                    debug!("Deleted stale {} row {:?}", kind.table(), key);
                    match kind {
                        EntityKind::Base => report.bases_deleted += 1,
                        EntityKind::Record => report.records_deleted += 1,
                    }
                }
            }
        }

        info!(
            "Reconciled against {}: deleted {} bases, {} records; kept {} failed bases",
            scan_id, report.bases_deleted, report.records_deleted, report.bases_protected
        );
        Ok(report)
    }
}
