//! Harvest crate - Resumable bulk export of Airtable enterprise data
//!
//! This crate provides:
//! - Domain models (Workspace, Base, Record, ScanId)
//! - The remote API seam, an HTTP client and an in-memory remote
//! - Storage trait abstractions with SQLite and in-memory backends
//! - The scan engine: crawl, per-base scan, reconciliation
//!
//! Every write carries the scan id of the run that made it, so runs can
//! be interrupted and resumed without redoing finished bases.

pub mod airtable;
pub mod config;
pub mod models;
pub mod storage;
pub mod sync;

pub use airtable::{AirtableApi, AirtableClient, ApiError, MockAirtable, MockCall};
pub use config::HarvestConfig;
pub use models::{Base, Record, RecordKey, ScanId, Workspace};
pub use storage::{
    AttachmentDir, EntityKey, EntityKind, ExportStore, InMemoryExportStore, SqliteExportStore,
    sanitize_filename,
};
pub use sync::{
    // Run orchestration
    LastRun, RunPhase, ScanCoordinator, ScanOptions, ScanReport,
    // Building blocks
    BaseOutcome, BaseScanStats, BaseScanner, BoundedTasks, CrawlStats, RecordPages,
    ReconcileReport, Reconciler, WorkspaceCrawler, with_retry,
    // Settings and run state
    ConcurrencyLimits, RetryPolicy, ScanContext, ScanSettings, ScanStage, SkipList, SkipReason,
};
