//! In-memory storage implementation
//!
//! Used by tests and dry runs. Mirrors the SQLite store's semantics,
//! including the base -> records cascade on delete.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::traits::{EntityKey, EntityKind, ExportStore};
use crate::models::{Base, Record, RecordKey, ScanId, Workspace};

/// In-memory implementation of ExportStore
///
/// Workspaces and bases remember their insertion sequence so listings come
/// back in discovery order, like the SQLite rowid ordering.
pub struct InMemoryExportStore {
    workspaces: RwLock<HashMap<String, (u64, Workspace)>>,
    bases: RwLock<HashMap<String, (u64, Base)>>,
    records: RwLock<BTreeMap<RecordKey, Record>>,
    next_seq: RwLock<u64>,
}

impl InMemoryExportStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            workspaces: RwLock::new(HashMap::new()),
            bases: RwLock::new(HashMap::new()),
            records: RwLock::new(BTreeMap::new()),
            next_seq: RwLock::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        let mut seq = self.next_seq.write().unwrap();
        *seq += 1;
        *seq
    }

    fn sorted_bases<F>(&self, filter: F) -> Vec<Base>
    where
        F: Fn(&Base) -> bool,
    {
        let bases = self.bases.read().unwrap();
        let mut list: Vec<_> = bases.values().filter(|(_, b)| filter(b)).collect();
        list.sort_by_key(|(seq, _)| *seq);
        list.into_iter().map(|(_, b)| b.clone()).collect()
    }
}

impl Default for InMemoryExportStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportStore for InMemoryExportStore {
    fn upsert_workspace(&self, workspace: Workspace) -> Result<()> {
        let seq = self.next_seq();
        let mut workspaces = self.workspaces.write().unwrap();
        match workspaces.get_mut(&workspace.id) {
            Some((_, existing)) => *existing = workspace,
            None => {
                workspaces.insert(workspace.id.clone(), (seq, workspace));
            }
        }
        Ok(())
    }

    fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        let workspaces = self.workspaces.read().unwrap();
        Ok(workspaces.get(id).map(|(_, w)| w.clone()))
    }

    fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let workspaces = self.workspaces.read().unwrap();
        let mut list: Vec<_> = workspaces.values().collect();
        list.sort_by_key(|(seq, _)| *seq);
        Ok(list.into_iter().map(|(_, w)| w.clone()).collect())
    }

    fn upsert_base(&self, base: Base) -> Result<()> {
        let seq = self.next_seq();
        let mut bases = self.bases.write().unwrap();
        match bases.get_mut(&base.id) {
            Some((_, existing)) => {
                existing.workspace_id = base.workspace_id;
                existing.name = base.name;
                existing.created_time = base.created_time;
                if base.scan_time.is_some() {
                    existing.scan_time = base.scan_time;
                }
                if base.scan_id.is_some() {
                    existing.scan_id = base.scan_id;
                }
            }
            None => {
                bases.insert(base.id.clone(), (seq, base));
            }
        }
        Ok(())
    }

    fn get_base(&self, id: &str) -> Result<Option<Base>> {
        let bases = self.bases.read().unwrap();
        Ok(bases.get(id).map(|(_, b)| b.clone()))
    }

    fn list_bases(&self) -> Result<Vec<Base>> {
        Ok(self.sorted_bases(|_| true))
    }

    fn list_bases_pending(&self, scan_id: &ScanId) -> Result<Vec<Base>> {
        Ok(self.sorted_bases(|b| !b.is_scanned_in(scan_id)))
    }

    fn mark_base_scanned(&self, base_id: &str, scan_id: &ScanId, at: DateTime<Utc>) -> Result<()> {
        let mut bases = self.bases.write().unwrap();
        let Some((_, base)) = bases.get_mut(base_id) else {
            bail!("Cannot mark unknown base {base_id} as scanned");
        };
        base.mark_scanned(scan_id.clone(), at);
        Ok(())
    }

    fn upsert_record(&self, record: Record) -> Result<()> {
        let mut records = self.records.write().unwrap();
        records.insert(record.key.clone(), record);
        Ok(())
    }

    fn get_record(&self, key: &RecordKey) -> Result<Option<Record>> {
        let records = self.records.read().unwrap();
        Ok(records.get(key).cloned())
    }

    fn list_records_for_base(&self, base_id: &str) -> Result<Vec<Record>> {
        let records = self.records.read().unwrap();
        Ok(records
            .values()
            .filter(|r| r.key.base_id == base_id)
            .cloned()
            .collect())
    }

    fn count_records(&self) -> Result<usize> {
        Ok(self.records.read().unwrap().len())
    }

    fn stale_keys(&self, kind: EntityKind, scan_id: &ScanId) -> Result<Vec<EntityKey>> {
        let keys = match kind {
            EntityKind::Base => self
                .sorted_bases(|b| !b.is_scanned_in(scan_id))
                .into_iter()
                .map(|b| EntityKey::Base(b.id))
                .collect(),
            EntityKind::Record => {
                let records = self.records.read().unwrap();
                records
                    .values()
                    .filter(|r| &r.scan_id != scan_id)
                    .map(|r| EntityKey::Record(r.key.clone()))
                    .collect()
            }
        };
        Ok(keys)
    }

    fn delete_entity(&self, key: &EntityKey) -> Result<bool> {
        match key {
            EntityKey::Base(id) => {
                let removed = self.bases.write().unwrap().remove(id).is_some();
                if removed {
                    // Cascade
                    let mut records = self.records.write().unwrap();
                    records.retain(|k, _| &k.base_id != id);
                }
                Ok(removed)
            }
            EntityKey::Record(key) => Ok(self.records.write().unwrap().remove(key).is_some()),
        }
    }
}
