//! Record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ScanId;

/// Composite identity of a record row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub base_id: String,
    pub table_id: String,
    pub record_id: String,
}

impl RecordKey {
    pub fn new(
        base_id: impl Into<String>,
        table_id: impl Into<String>,
        record_id: impl Into<String>,
    ) -> Self {
        Self {
            base_id: base_id.into(),
            table_id: table_id.into(),
            record_id: record_id.into(),
        }
    }
}

/// The latest observed value of a remote record
///
/// Rows are overwritten in place; the store keeps no history beyond the
/// tag of the run that last wrote the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: RecordKey,
    /// Opaque field payload, stored as serialized JSON
    pub data: serde_json::Value,
    pub created_time: DateTime<Utc>,
    pub scan_id: ScanId,
}

impl Record {
    pub fn new(
        key: RecordKey,
        data: serde_json::Value,
        created_time: DateTime<Utc>,
        scan_id: ScanId,
    ) -> Self {
        Self {
            key,
            data,
            created_time,
            scan_id,
        }
    }
}
