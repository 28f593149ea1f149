//! Domain models for exported entities

mod base;
mod record;
mod scan;
mod workspace;

pub use base::Base;
pub use record::{Record, RecordKey};
pub use scan::ScanId;
pub use workspace::Workspace;
