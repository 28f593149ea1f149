//! Storage traits and implementations
//!
//! The `ExportStore` trait is the only way the sync engine touches the
//! durable store. SQLite is the production backend; the in-memory store
//! backs tests.

mod attachments;
mod memory;
mod sqlite;
mod traits;

pub use attachments::{AttachmentDir, sanitize_filename};
pub use memory::InMemoryExportStore;
pub use sqlite::SqliteExportStore;
pub use traits::{EntityKey, EntityKind, ExportStore};
