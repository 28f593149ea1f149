//! Top-level scan driver
//!
//! Owns the scan id and the skip list of one run and sequences the
//! phases: crawl, scan, optional reconciliation.

use std::collections::HashSet;
use std::fmt;

use anyhow::{Context, Result, bail};
use log::info;

use super::context::ScanContext;
use super::crawler::{CrawlStats, WorkspaceCrawler};
use super::reconcile::{ReconcileReport, Reconciler};
use super::scanner::{BaseOutcome, BaseScanner};
use super::skip::{SkipList, SkipReason};
use super::tasks::BoundedTasks;
use crate::models::ScanId;

/// Options for one run
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Resume a named run; a fresh id is generated when unset
    pub scan_id: Option<String>,
    /// Refresh the workspace/base inventory before scanning
    pub crawl: bool,
    /// Delete rows not re-observed by this run
    pub delete_stale: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            scan_id: None,
            crawl: true,
            delete_stale: false,
        }
    }
}

/// Phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Crawling,
    Scanning,
    Reconciling,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Init => "init",
            RunPhase::Crawling => "crawling",
            RunPhase::Scanning => "scanning",
            RunPhase::Reconciling => "reconciling",
            RunPhase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub scan_id: ScanId,
    /// Set when the crawl phase ran
    pub crawl: Option<CrawlStats>,
    /// Bases not yet tagged with the scan id when scanning started
    pub bases_selected: usize,
    pub bases_scanned: usize,
    pub bases_gone: usize,
    pub bases_unscannable: usize,
    pub tables_scanned: usize,
    pub records_written: usize,
    pub attachments_downloaded: usize,
    /// Bases that will be retried by the next run, ordered by id
    pub skipped: Vec<(String, SkipReason)>,
    /// Set when deletion was requested
    pub reconcile: Option<ReconcileReport>,
    pub duration_ms: u64,
}

impl ScanReport {
    pub(crate) fn new(scan_id: ScanId) -> Self {
        Self {
            scan_id,
            crawl: None,
            bases_selected: 0,
            bases_scanned: 0,
            bases_gone: 0,
            bases_unscannable: 0,
            tables_scanned: 0,
            records_written: 0,
            attachments_downloaded: 0,
            skipped: Vec::new(),
            reconcile: None,
            duration_ms: 0,
        }
    }
}

/// Drives one run from scan id selection to reconciliation
pub struct ScanCoordinator {
    ctx: ScanContext,
    account_ids: Vec<String>,
    phase: RunPhase,
}

impl ScanCoordinator {
    pub fn new(ctx: ScanContext, account_ids: Vec<String>) -> Self {
        Self {
            ctx,
            account_ids,
            phase: RunPhase::Init,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn enter(&mut self, phase: RunPhase) {
        info!("Run phase: {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    /// Execute the run
    ///
    /// Only crawl and store failures are returned as errors. Base-level
    /// failures end up in the report's skip list.
    pub async fn run(&mut self, options: ScanOptions) -> Result<ScanReport> {
        let start = std::time::Instant::now();
        if self.phase != RunPhase::Init {
            bail!("Coordinator already ran (phase {})", self.phase);
        }

        // 1. Resolve the scan id
        let scan_id = ScanId::resolve(options.scan_id.as_deref());
        info!("Scan id: {scan_id}");
        let mut report = ScanReport::new(scan_id.clone());

        // 2. Crawl
        if options.crawl {
            self.enter(RunPhase::Crawling);
            let stats = WorkspaceCrawler::new(self.ctx.clone())
                .crawl(&self.account_ids)
                .await?;
            info!(
                "Crawled {} workspaces and {} bases in {}ms",
                stats.workspaces, stats.bases, stats.duration_ms
            );
            report.crawl = Some(stats);
        }

        // 3. Scan every base not yet tagged with this run's id
        self.enter(RunPhase::Scanning);
        let pending_id = scan_id.clone();
        let pending = self
            .ctx
            .store_op(move |store| store.list_bases_pending(&pending_id))
            .await
            .context("Failed to list pending bases")?;
        report.bases_selected = pending.len();
        info!("{} bases to scan", pending.len());

        let skip_list = SkipList::new();
        let mut unscannable = HashSet::new();
        let mut tasks = BoundedTasks::new(self.ctx.limits().bases);
        for base in pending {
            let base_id = base.id.clone();
            let scanner = BaseScanner::new(self.ctx.clone(), base, scan_id.clone(), skip_list.clone());
            tasks.spawn(base_id, scanner.run());
        }

        // Every scan resolves before reconciliation may start
        while let Some((base_id, joined)) = tasks.join_next().await {
            match joined {
                Ok(BaseOutcome::Scanned(stats)) => {
                    report.bases_scanned += 1;
                    report.tables_scanned += stats.tables;
                    report.records_written += stats.records;
                    report.attachments_downloaded += stats.attachments_downloaded;
                }
                Ok(BaseOutcome::Gone) => report.bases_gone += 1,
                Ok(BaseOutcome::Unscannable) => {
                    report.bases_unscannable += 1;
                    unscannable.insert(base_id);
                }
                Ok(BaseOutcome::Skipped(_)) => {}
                Err(e) => skip_list.record(base_id, SkipReason::Aborted(e.to_string())),
            }
        }
        report.skipped = skip_list.entries();

        // 4. Reconcile
        if options.delete_stale {
            self.enter(RunPhase::Reconciling);
            let mut protected = skip_list.base_ids();
            protected.extend(unscannable);
            let reconcile_id = scan_id.clone();
            let reconciled = self
                .ctx
                .store_op(move |store| Reconciler::new(store, &protected).run(&reconcile_id))
                .await
                .context("Failed to reconcile store")?;
            report.reconcile = Some(reconciled);
        }

        self.enter(RunPhase::Done);
        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Run {} finished: {} scanned, {} gone, {} unscannable, {} skipped in {}ms",
            scan_id,
            report.bases_scanned,
            report.bases_gone,
            report.bases_unscannable,
            report.skipped.len(),
            report.duration_ms
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airtable::api::{BaseDetail, RemoteRecord, TableSchema, WorkspaceDetail};
    use crate::airtable::{ApiError, MockAirtable, MockCall};
    use crate::storage::{ExportStore, InMemoryExportStore};
    use crate::sync::context::ScanSettings;
    use crate::sync::retry::RetryPolicy;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;

    fn remote(base_ids: &[&str]) -> Arc<MockAirtable> {
        let mock = MockAirtable::new(10);
        let mut ws = WorkspaceDetail::new("wsp1", "Main", Utc::now());
        ws.base_ids = base_ids.iter().map(|s| s.to_string()).collect();
        mock.add_workspace("acc1", ws);
        for id in base_ids {
            mock.add_base(BaseDetail::new(*id, *id, Utc::now()));
            mock.add_table(id, TableSchema::new("tbl1", "Rows", vec![]));
            mock.add_records(
                id,
                "tbl1",
                vec![RemoteRecord::new("rec1", Utc::now(), json!({"Name": id}))],
            );
        }
        Arc::new(mock)
    }

    fn coordinator(mock: Arc<MockAirtable>) -> (ScanCoordinator, Arc<InMemoryExportStore>) {
        let store = Arc::new(InMemoryExportStore::new());
        let settings = ScanSettings::new("usrAdmin").with_retry(RetryPolicy::immediate(2));
        let ctx = ScanContext::new(mock, store.clone(), settings);
        (ScanCoordinator::new(ctx, vec!["acc1".to_string()]), store)
    }

    #[tokio::test]
    async fn test_full_run() {
        let (mut coordinator, store) = coordinator(remote(&["app1", "app2", "app3"]));
        let report = coordinator
            .run(ScanOptions {
                scan_id: Some("S".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(coordinator.phase(), RunPhase::Done);
        assert_eq!(report.scan_id.as_str(), "S");
        assert_eq!(report.bases_selected, 3);
        assert_eq!(report.bases_scanned, 3);
        assert_eq!(report.records_written, 3);
        assert!(report.skipped.is_empty());
        assert!(report.reconcile.is_none());
        assert!(
            store
                .list_bases()
                .unwrap()
                .iter()
                .all(|b| b.is_scanned_in(&ScanId::new("S")))
        );
    }

    #[tokio::test]
    async fn test_generated_scan_id() {
        let (mut coordinator, _store) = coordinator(remote(&["app1"]));
        let report = coordinator.run(ScanOptions::default()).await.unwrap();
        assert!(!report.scan_id.as_str().is_empty());
        assert_eq!(report.bases_scanned, 1);
    }

    #[tokio::test]
    async fn test_skipped_base_does_not_fail_run() {
        let mock = remote(&["app1", "app2"]);
        mock.fail(
            MockCall::Grant("app2".into()),
            ApiError::Forbidden("no".into()),
            None,
        );
        let (mut coordinator, store) = coordinator(mock);

        let report = coordinator.run(ScanOptions::default()).await.unwrap();
        assert_eq!(report.bases_scanned, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "app2");
        assert!(store.get_base("app2").unwrap().unwrap().scan_id.is_none());
    }

    #[tokio::test]
    async fn test_crawl_failure_fails_run() {
        let mock = remote(&["app1"]);
        mock.fail(
            MockCall::Workspace("wsp1".into()),
            ApiError::Status {
                status: 500,
                message: "down".into(),
            },
            None,
        );
        let (mut coordinator, store) = coordinator(mock);

        assert!(coordinator.run(ScanOptions::default()).await.is_err());
        assert_eq!(coordinator.phase(), RunPhase::Crawling);
        assert!(store.list_bases().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skip_crawl_scans_stored_inventory() {
        let mock = remote(&["app1"]);
        let (mut coordinator, store) = coordinator(mock.clone());
        store
            .upsert_base(crate::models::Base::discovered("app1", "wsp1", "app1", Utc::now()))
            .unwrap();

        let report = coordinator
            .run(ScanOptions {
                crawl: false,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(report.crawl.is_none());
        assert_eq!(report.bases_scanned, 1);
        assert!(!mock.calls().contains(&MockCall::Account("acc1".into())));
    }

    #[tokio::test]
    async fn test_unscannable_base_is_protected_from_deletion() {
        let mock = remote(&["app1", "app2"]);
        mock.fail(
            MockCall::Tables("app2".into()),
            ApiError::Forbidden("plan".into()),
            None,
        );
        let (mut coordinator, store) = coordinator(mock);

        let report = coordinator
            .run(ScanOptions {
                delete_stale: true,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(report.bases_unscannable, 1);
        assert_eq!(report.reconcile.unwrap().bases_protected, 1);
        assert!(store.get_base("app2").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_coordinator_runs_once() {
        let (mut coordinator, _store) = coordinator(remote(&["app1"]));
        coordinator.run(ScanOptions::default()).await.unwrap();
        assert!(coordinator.run(ScanOptions::default()).await.is_err());
    }
}
