//! Per-base scan lifecycle
//!
//! A base moves through an explicit state machine:
//!
//! ```text
//! Granting -> Discovering -> ScanningTables -> Revoking -> Committing -> Done
//!     |            |               |               |            |
//!     +------------+---> Releasing +---------------+------------+--> Done
//! ```
//!
//! `Committing` is the only state that tags the base with the run's scan
//! id, and it is only reachable after every table was written. Failures
//! after the grant go through `Releasing`, which revokes the grant on a
//! best-effort basis before the outcome is final.

use std::collections::HashSet;
use std::ops::AddAssign;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value;

use super::context::ScanContext;
use super::pages::RecordPages;
use super::retry::with_retry;
use super::skip::{ScanStage, SkipList, SkipReason};
use super::tasks::BoundedTasks;
use crate::airtable::api::{AttachmentRef, PermissionLevel, TableSchema};
use crate::models::{Base, Record, RecordKey, ScanId};

/// Counters for one base (or one table of it)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BaseScanStats {
    pub tables: usize,
    pub records: usize,
    pub attachments_downloaded: usize,
    /// Already on disk from an earlier run
    pub attachments_skipped: usize,
}

impl AddAssign for BaseScanStats {
    fn add_assign(&mut self, other: Self) {
        self.tables += other.tables;
        self.records += other.records;
        self.attachments_downloaded += other.attachments_downloaded;
        self.attachments_skipped += other.attachments_skipped;
    }
}

/// How a base scan ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseOutcome {
    /// Every table written and the base tagged with the run's scan id
    Scanned(BaseScanStats),
    /// Deleted upstream; left untagged for reconciliation to remove
    Gone,
    /// Metadata API not available for this base; left untagged
    Unscannable,
    /// Recoverable failure; recorded in the skip list
    Skipped(SkipReason),
}

impl BaseOutcome {
    pub fn is_scanned(&self) -> bool {
        matches!(self, BaseOutcome::Scanned(_))
    }
}

#[derive(Debug)]
enum BaseScanState {
    Granting,
    Discovering,
    ScanningTables(Vec<TableSchema>),
    Revoking(BaseScanStats),
    /// Revoke best-effort, then finish with the given outcome
    Releasing(BaseOutcome),
    Committing(BaseScanStats),
    Done(BaseOutcome),
}

impl BaseScanState {
    fn name(&self) -> &'static str {
        match self {
            BaseScanState::Granting => "granting",
            BaseScanState::Discovering => "discovering",
            BaseScanState::ScanningTables(_) => "scanning tables",
            BaseScanState::Revoking(_) => "revoking",
            BaseScanState::Releasing(_) => "releasing",
            BaseScanState::Committing(_) => "committing",
            BaseScanState::Done(_) => "done",
        }
    }
}

/// Scans one base for one run
pub struct BaseScanner {
    ctx: ScanContext,
    base: Base,
    scan_id: ScanId,
    skip_list: SkipList,
}

impl BaseScanner {
    pub fn new(ctx: ScanContext, base: Base, scan_id: ScanId, skip_list: SkipList) -> Self {
        Self {
            ctx,
            base,
            scan_id,
            skip_list,
        }
    }

    /// Drive the base to a final outcome
    ///
    /// Never fails: every error becomes an outcome. Skipped outcomes are
    /// recorded in the skip list before returning.
    pub async fn run(self) -> BaseOutcome {
        let mut state = BaseScanState::Granting;
        loop {
            debug!("Base {}: {}", self.base.id, state.name());
            state = match state {
                BaseScanState::Granting => self.grant().await,
                BaseScanState::Discovering => self.discover().await,
                BaseScanState::ScanningTables(tables) => self.scan_tables(tables).await,
                BaseScanState::Revoking(stats) => self.revoke(stats).await,
                BaseScanState::Releasing(outcome) => self.release(outcome).await,
                BaseScanState::Committing(stats) => self.commit(stats).await,
                BaseScanState::Done(outcome) => {
                    self.finish(&outcome);
                    return outcome;
                }
            };
        }
    }

    async fn grant(&self) -> BaseScanState {
        let api = &self.ctx.api;
        let base_id = &self.base.id;
        let user_id = &self.ctx.settings.admin_user_id;

        let granted = with_retry(self.ctx.retry(), &format!("grant on base {base_id}"), || {
            api.grant_base_access(base_id, user_id, PermissionLevel::Read)
        })
        .await;

        match granted {
            Ok(()) => BaseScanState::Discovering,
            Err(e) if e.is_not_found() => BaseScanState::Done(BaseOutcome::Gone),
            Err(e) if e.is_forbidden() => {
                BaseScanState::Done(BaseOutcome::Skipped(SkipReason::GrantForbidden(e.to_string())))
            }
            Err(e) => BaseScanState::Done(BaseOutcome::Skipped(SkipReason::Failed {
                stage: ScanStage::Grant,
                error: e.to_string(),
            })),
        }
    }

    async fn discover(&self) -> BaseScanState {
        let api = &self.ctx.api;
        let base_id = &self.base.id;

        let tables = with_retry(self.ctx.retry(), &format!("tables of base {base_id}"), || {
            api.list_tables(base_id)
        })
        .await;

        match tables {
            Ok(tables) => BaseScanState::ScanningTables(tables),
            Err(e) if e.is_forbidden() => {
                info!("Base {base_id}: metadata API not available ({e}), leaving unscanned");
                BaseScanState::Releasing(BaseOutcome::Unscannable)
            }
            Err(e) if e.is_not_found() => BaseScanState::Releasing(BaseOutcome::Gone),
            Err(e) => BaseScanState::Releasing(BaseOutcome::Skipped(SkipReason::Failed {
                stage: ScanStage::Discover,
                error: e.to_string(),
            })),
        }
    }

    async fn scan_tables(&self, tables: Vec<TableSchema>) -> BaseScanState {
        let mut tasks = BoundedTasks::new(self.ctx.limits().tables);
        for table in tables {
            let ctx = self.ctx.clone();
            let base_id = self.base.id.clone();
            let scan_id = self.scan_id.clone();
            tasks.spawn(table.id.clone(), scan_table(ctx, base_id, table, scan_id));
        }

        let mut stats = BaseScanStats::default();
        while let Some((table_id, joined)) = tasks.join_next().await {
            let error = match joined {
                Ok(Ok(table_stats)) => {
                    stats += table_stats;
                    continue;
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(e) => e.to_string(),
            };

            // First failure aborts the remaining tables of this base
            tasks.shutdown().await;
            warn!("Base {}: table {table_id} failed: {error}", self.base.id);
            return BaseScanState::Releasing(BaseOutcome::Skipped(SkipReason::TableFailed {
                table_id,
                error,
            }));
        }

        BaseScanState::Revoking(stats)
    }

    async fn revoke(&self, stats: BaseScanStats) -> BaseScanState {
        match self.revoke_grant().await {
            Ok(()) => BaseScanState::Committing(stats),
            Err(e) if e.is_forbidden() => {
                // Access came from the workspace; nothing to revoke per base
                warn!("Base {}: revoke forbidden ({e}), continuing", self.base.id);
                BaseScanState::Committing(stats)
            }
            Err(e) => BaseScanState::Done(BaseOutcome::Skipped(SkipReason::Failed {
                stage: ScanStage::Revoke,
                error: e.to_string(),
            })),
        }
    }

    async fn release(&self, outcome: BaseOutcome) -> BaseScanState {
        if let Err(e) = self.revoke_grant().await {
            debug!("Base {}: best-effort revoke failed: {e}", self.base.id);
        }
        BaseScanState::Done(outcome)
    }

    async fn revoke_grant(&self) -> Result<(), crate::airtable::ApiError> {
        let api = &self.ctx.api;
        let base_id = &self.base.id;
        let user_id = &self.ctx.settings.admin_user_id;

        with_retry(self.ctx.retry(), &format!("revoke on base {base_id}"), || {
            api.revoke_base_access(base_id, user_id)
        })
        .await
    }

    async fn commit(&self, stats: BaseScanStats) -> BaseScanState {
        let base_id = self.base.id.clone();
        let scan_id = self.scan_id.clone();
        let committed = self
            .ctx
            .store_op(move |store| store.mark_base_scanned(&base_id, &scan_id, Utc::now()))
            .await;

        match committed {
            Ok(()) => BaseScanState::Done(BaseOutcome::Scanned(stats)),
            Err(e) => BaseScanState::Done(BaseOutcome::Skipped(SkipReason::Failed {
                stage: ScanStage::Commit,
                error: format!("{e:#}"),
            })),
        }
    }

    fn finish(&self, outcome: &BaseOutcome) {
        let base_id = &self.base.id;
        match outcome {
            BaseOutcome::Scanned(stats) => info!(
                "Base {base_id}: scanned {} tables, {} records, {} attachments",
                stats.tables, stats.records, stats.attachments_downloaded
            ),
            BaseOutcome::Gone => info!("Base {base_id}: not found upstream"),
            BaseOutcome::Unscannable => info!("Base {base_id}: unscannable this run"),
            BaseOutcome::Skipped(reason) => {
                warn!("Base {base_id}: skipped ({reason})");
                self.skip_list.record(base_id.clone(), reason.clone());
            }
        }
    }
}

/// Page through one table, writing every record tagged with `scan_id`
///
/// Records are committed page by page, so a failure part-way leaves the
/// pages already written in the store.
async fn scan_table(
    ctx: ScanContext,
    base_id: String,
    table: TableSchema,
    scan_id: ScanId,
) -> Result<BaseScanStats> {
    let mut stats = BaseScanStats {
        tables: 1,
        ..Default::default()
    };
    let attachment_fields: Vec<String> = match ctx.settings.attachments {
        Some(_) => table.attachment_fields().map(|f| f.name.clone()).collect(),
        None => Vec::new(),
    };
    let mut attachments: Vec<AttachmentRef> = Vec::new();
    let mut seen = HashSet::new();

    let mut pages = RecordPages::new(
        ctx.api.clone(),
        base_id.clone(),
        table.id.clone(),
        *ctx.retry(),
    );
    while let Some(remote_records) = pages
        .next_page()
        .await
        .with_context(|| format!("Failed to list records of {base_id}/{}", table.id))?
    {
        let mut batch = Vec::with_capacity(remote_records.len());
        for remote in remote_records {
            for field in &attachment_fields {
                for attachment in remote.attachments(field) {
                    if seen.insert(attachment.id.clone()) {
                        attachments.push(attachment);
                    }
                }
            }
            batch.push(Record::new(
                RecordKey::new(base_id.clone(), table.id.clone(), remote.id),
                Value::Object(remote.fields),
                remote.created_time,
                scan_id.clone(),
            ));
        }

        let written = batch.len();
        ctx.store_op(move |store| {
            for record in batch {
                store.upsert_record(record)?;
            }
            Ok(())
        })
        .await
        .with_context(|| format!("Failed to store records of {base_id}/{}", table.id))?;
        stats.records += written;
    }
    debug!(
        "Table {base_id}/{}: {} records in {} pages",
        table.id,
        stats.records,
        pages.pages_fetched()
    );

    if let Some(dir) = &ctx.settings.attachments {
        for attachment in &attachments {
            if dir.contains(&base_id, attachment) {
                stats.attachments_skipped += 1;
                continue;
            }
            let dest = dir.path_for(&base_id, attachment);
            with_retry(ctx.retry(), &format!("attachment {}", attachment.id), || {
                ctx.api.download_attachment(&attachment.url, &dest)
            })
            .await
            .with_context(|| format!("Failed to download attachment {}", attachment.id))?;
            stats.attachments_downloaded += 1;
        }
    }

    Ok(stats)
}
