//! Scan engine
//!
//! Crawls the remote inventory, scans bases with bounded concurrency and
//! reconciles the store against what this run observed. Every write is
//! idempotent and tagged with the run's scan id, so an interrupted run can
//! be resumed by invoking it again with the same id.

mod context;
mod coordinator;
mod crawler;
mod last_run;
mod pages;
mod reconcile;
mod retry;
mod scanner;
mod skip;
mod tasks;

pub use context::{ConcurrencyLimits, ScanContext, ScanSettings};
pub use coordinator::{RunPhase, ScanCoordinator, ScanOptions, ScanReport};
pub use crawler::{CrawlStats, WorkspaceCrawler};
pub use last_run::LastRun;
pub use pages::RecordPages;
pub use reconcile::{ReconcileReport, Reconciler};
pub use retry::{RetryPolicy, with_retry};
pub use scanner::{BaseOutcome, BaseScanStats, BaseScanner};
pub use skip::{ScanStage, SkipList, SkipReason};
pub use tasks::BoundedTasks;
