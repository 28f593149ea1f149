//! Workspace model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A workspace as last seen by the crawler
///
/// Workspaces are not versioned by scan identifier: every crawl overwrites
/// the row with the latest observed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub created_time: DateTime<Utc>,
    /// Comma-joined emails of collaborators holding the owner permission
    pub owners: String,
}

impl Workspace {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        created_time: DateTime<Utc>,
        owners: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_time,
            owners: owners.into(),
        }
    }

    /// Owner emails as a list
    pub fn owner_emails(&self) -> Vec<&str> {
        self.owners
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}
