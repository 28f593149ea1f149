//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{Base, Record, RecordKey, ScanId, Workspace};

/// Entity kinds carrying a scan tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Base,
    Record,
}

impl EntityKind {
    /// Backing table name
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Base => "bases",
            EntityKind::Record => "data",
        }
    }
}

/// Identity of a tagged row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Base(String),
    Record(RecordKey),
}

impl EntityKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityKey::Base(_) => EntityKind::Base,
            EntityKey::Record(_) => EntityKind::Record,
        }
    }

    /// The base a row belongs to (a base belongs to itself)
    pub fn base_id(&self) -> &str {
        match self {
            EntityKey::Base(id) => id,
            EntityKey::Record(key) => &key.base_id,
        }
    }
}

/// Trait for export storage operations
///
/// Every write is committed on its own and is idempotent: writing the same
/// identity again replaces the previous content. Implementations serialize
/// their own writes, so callers may share one store across tasks.
pub trait ExportStore: Send + Sync {
    /// Insert or replace a workspace
    fn upsert_workspace(&self, workspace: Workspace) -> Result<()>;

    fn get_workspace(&self, id: &str) -> Result<Option<Workspace>>;

    fn list_workspaces(&self) -> Result<Vec<Workspace>>;

    /// Insert or update base metadata
    ///
    /// Scan fields are only written when set on `base`; an existing tag is
    /// never cleared by a metadata refresh.
    fn upsert_base(&self, base: Base) -> Result<()>;

    fn get_base(&self, id: &str) -> Result<Option<Base>>;

    /// All bases, in discovery order
    fn list_bases(&self) -> Result<Vec<Base>>;

    /// Bases whose tag is unset or differs from `scan_id`, in discovery order
    fn list_bases_pending(&self, scan_id: &ScanId) -> Result<Vec<Base>>;

    /// Tag a base as fully scanned by the given run
    fn mark_base_scanned(&self, base_id: &str, scan_id: &ScanId, at: DateTime<Utc>) -> Result<()>;

    /// Insert or replace a record row
    fn upsert_record(&self, record: Record) -> Result<()>;

    fn get_record(&self, key: &RecordKey) -> Result<Option<Record>>;

    fn list_records_for_base(&self, base_id: &str) -> Result<Vec<Record>>;

    fn count_records(&self) -> Result<usize>;

    /// Keys of rows of `kind` whose tag is unset or differs from `scan_id`
    fn stale_keys(&self, kind: EntityKind, scan_id: &ScanId) -> Result<Vec<EntityKey>>;

    /// Delete one row; deleting a base also deletes its records.
    /// Returns whether a row was removed.
    fn delete_entity(&self, key: &EntityKey) -> Result<bool>;
}
