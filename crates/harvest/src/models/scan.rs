//! Scan run identifier

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque token tagging every base and record written by one run
///
/// Only equality matters: a row either carries the current run's id or it
/// is stale. Fresh ids are UUID v7 so they sort by creation time when a
/// human looks at the store, but nothing relies on that ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanId(pub String);

impl ScanId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, unique identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Use the caller-supplied id verbatim (resuming a named run), or
    /// generate a fresh one when none or an empty string is given
    pub fn resolve(requested: Option<&str>) -> Self {
        match requested.filter(|s| !s.is_empty()) {
            Some(id) => Self::new(id),
            None => Self::generate(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ScanId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ScanId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(ScanId::generate(), ScanId::generate());
    }

    #[test]
    fn test_resolve_uses_requested_verbatim() {
        assert_eq!(ScanId::resolve(Some("nightly-42")).as_str(), "nightly-42");
        // Whitespace is part of the id
        assert_eq!(ScanId::resolve(Some(" nightly-42 ")).as_str(), " nightly-42 ");
        assert_eq!(ScanId::resolve(Some("  ")).as_str(), "  ");
    }

    #[test]
    fn test_resolve_generates_when_missing_or_empty() {
        assert!(!ScanId::resolve(None).as_str().is_empty());
        assert_ne!(ScanId::resolve(Some("")).as_str(), "");
    }
}
