//! Workspace and base discovery
//!
//! The crawl is all-or-nothing per account: any remote failure aborts it,
//! since scanning and reconciliation both rely on a complete inventory.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result, bail};
use log::{debug, info};

use super::context::ScanContext;
use super::retry::with_retry;
use super::tasks::BoundedTasks;
use crate::airtable::api::{BaseDetail, WorkspaceDetail};
use crate::models::{Base, Workspace};

/// Statistics from a crawl
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlStats {
    /// Accounts crawled
    pub accounts: usize,
    /// Workspaces fetched and stored
    pub workspaces: usize,
    /// Bases fetched and stored
    pub bases: usize,
    /// Duration of the crawl
    pub duration_ms: u64,
}

/// Populates workspace and base metadata in the store
pub struct WorkspaceCrawler {
    ctx: ScanContext,
}

impl WorkspaceCrawler {
    pub fn new(ctx: ScanContext) -> Self {
        Self { ctx }
    }

    /// Crawl every account, one after the other
    pub async fn crawl(&self, account_ids: &[String]) -> Result<CrawlStats> {
        let start = std::time::Instant::now();
        let mut stats = CrawlStats::default();

        for account_id in account_ids {
            self.crawl_account(account_id, &mut stats)
                .await
                .with_context(|| format!("Failed to crawl account {account_id}"))?;
            stats.accounts += 1;
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    async fn crawl_account(&self, account_id: &str, stats: &mut CrawlStats) -> Result<()> {
        let ctx = &self.ctx;

        // 1. Account introspection
        let account = with_retry(ctx.retry(), &format!("account {account_id}"), || {
            ctx.api.get_enterprise_account(account_id)
        })
        .await?;
        info!(
            "Account {}: {} workspaces, {} members",
            account_id,
            account.workspace_ids.len(),
            account.user_ids.len()
        );

        // 2. Workspace details, bounded
        let mut tasks = BoundedTasks::new(ctx.limits().workspaces);
        for workspace_id in &account.workspace_ids {
            let task_ctx = ctx.clone();
            let id = workspace_id.clone();
            tasks.spawn(workspace_id.clone(), async move {
                with_retry(task_ctx.retry(), &format!("workspace {id}"), || {
                    task_ctx.api.get_workspace(&id)
                })
                .await
            });
        }
        let mut details: HashMap<String, WorkspaceDetail> = HashMap::new();
        while let Some((workspace_id, joined)) = tasks.join_next().await {
            match joined {
                Ok(Ok(detail)) => {
                    details.insert(workspace_id, detail);
                }
                Ok(Err(e)) => {
                    tasks.shutdown().await;
                    return Err(e).with_context(|| format!("Failed to fetch workspace {workspace_id}"));
                }
                Err(e) => {
                    tasks.shutdown().await;
                    bail!("Workspace task {workspace_id} failed: {e}");
                }
            }
        }

        // 3. Store workspaces and collect candidate bases, in account order
        let mut candidates: Vec<(String, String)> = Vec::new();
        let mut seen = HashSet::new();
        for workspace_id in &account.workspace_ids {
            let Some(detail) = details.remove(workspace_id) else {
                continue;
            };
            for base_id in &detail.base_ids {
                if seen.insert(base_id.clone()) {
                    candidates.push((base_id.clone(), detail.id.clone()));
                }
            }

            let workspace = Workspace::new(
                detail.id.clone(),
                detail.name.clone(),
                detail.created_time,
                detail.owner_emails(),
            );
            ctx.store_op(move |store| store.upsert_workspace(workspace))
                .await
                .with_context(|| format!("Failed to store workspace {workspace_id}"))?;
            stats.workspaces += 1;
        }
        debug!("Account {}: {} candidate bases", account_id, candidates.len());

        // 4. Base details, bounded
        let mut tasks = BoundedTasks::new(ctx.limits().base_metadata);
        for (base_id, _) in &candidates {
            let task_ctx = ctx.clone();
            let id = base_id.clone();
            tasks.spawn(base_id.clone(), async move {
                with_retry(task_ctx.retry(), &format!("base {id}"), || {
                    task_ctx.api.get_base(&id)
                })
                .await
            });
        }
        let mut bases: HashMap<String, BaseDetail> = HashMap::new();
        while let Some((base_id, joined)) = tasks.join_next().await {
            match joined {
                Ok(Ok(detail)) => {
                    bases.insert(base_id, detail);
                }
                Ok(Err(e)) => {
                    tasks.shutdown().await;
                    return Err(e).with_context(|| format!("Failed to fetch base {base_id}"));
                }
                Err(e) => {
                    tasks.shutdown().await;
                    bail!("Base task {base_id} failed: {e}");
                }
            }
        }

        // 5. Store bases in discovery order; scan fields stay untouched
        for (base_id, workspace_id) in candidates {
            let Some(detail) = bases.remove(&base_id) else {
                continue;
            };
            let base = Base::discovered(detail.id, workspace_id, detail.name, detail.created_time);
            ctx.store_op(move |store| store.upsert_base(base))
                .await
                .with_context(|| format!("Failed to store base {base_id}"))?;
            stats.bases += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airtable::api::{Collaborator, WorkspaceDetail};
    use crate::airtable::{ApiError, MockAirtable, MockCall};
    use crate::models::ScanId;
    use crate::storage::{ExportStore, InMemoryExportStore};
    use crate::sync::context::ScanSettings;
    use crate::sync::retry::RetryPolicy;
    use chrono::Utc;
    use std::sync::Arc;

    fn remote() -> Arc<MockAirtable> {
        let mock = MockAirtable::new(100);
        let mut ws1 = WorkspaceDetail::new("wsp1", "Design", Utc::now());
        ws1.base_ids = vec!["app1".into(), "app2".into()];
        ws1.collaborators.workspace_collaborators = vec![
            Collaborator::new("usr1", "ada@example.com", "owner"),
            Collaborator::new("usr2", "bob@example.com", "edit"),
            Collaborator::new("usr3", "cy@example.com", "owner"),
        ];
        let mut ws2 = WorkspaceDetail::new("wsp2", "Ops", Utc::now());
        ws2.base_ids = vec!["app3".into()];
        mock.add_workspace("acc1", ws1);
        mock.add_workspace("acc1", ws2);
        for id in ["app1", "app2", "app3"] {
            mock.add_base(BaseDetail::new(id, format!("Base {id}"), Utc::now()));
        }
        Arc::new(mock)
    }

    fn context(mock: Arc<MockAirtable>) -> (ScanContext, Arc<InMemoryExportStore>) {
        let store = Arc::new(InMemoryExportStore::new());
        let settings = ScanSettings::new("usrAdmin").with_retry(RetryPolicy::immediate(3));
        (ScanContext::new(mock, store.clone(), settings), store)
    }

    #[tokio::test]
    async fn test_crawl_populates_inventory() {
        let (ctx, store) = context(remote());
        let stats = WorkspaceCrawler::new(ctx)
            .crawl(&["acc1".to_string()])
            .await
            .unwrap();

        assert_eq!(stats.accounts, 1);
        assert_eq!(stats.workspaces, 2);
        assert_eq!(stats.bases, 3);

        let ws = store.get_workspace("wsp1").unwrap().unwrap();
        assert_eq!(ws.owners, "ada@example.com,cy@example.com");

        let bases = store.list_bases().unwrap();
        let ids: Vec<_> = bases.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["app1", "app2", "app3"]);
        assert_eq!(bases[2].workspace_id, "wsp2");
        assert!(bases.iter().all(|b| b.scan_id.is_none() && b.scan_time.is_none()));
    }

    #[tokio::test]
    async fn test_recrawl_keeps_scan_tags() {
        let (ctx, store) = context(remote());
        let crawler = WorkspaceCrawler::new(ctx);
        crawler.crawl(&["acc1".to_string()]).await.unwrap();

        let run = ScanId::new("run-1");
        store.mark_base_scanned("app1", &run, Utc::now()).unwrap();
        crawler.crawl(&["acc1".to_string()]).await.unwrap();

        assert!(store.get_base("app1").unwrap().unwrap().is_scanned_in(&run));
    }

    #[tokio::test]
    async fn test_failure_aborts_crawl() {
        let mock = remote();
        mock.fail(
            MockCall::Base("app2".into()),
            ApiError::Status {
                status: 500,
                message: "oops".into(),
            },
            None,
        );
        let (ctx, _store) = context(mock);

        let err = WorkspaceCrawler::new(ctx)
            .crawl(&["acc1".to_string()])
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("acc1"));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mock = remote();
        mock.fail(
            MockCall::Workspace("wsp2".into()),
            ApiError::Timeout("slow".into()),
            Some(2),
        );
        let (ctx, store) = context(mock);

        WorkspaceCrawler::new(ctx)
            .crawl(&["acc1".to_string()])
            .await
            .unwrap();
        assert_eq!(store.list_workspaces().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_account_fails() {
        let (ctx, _store) = context(remote());
        assert!(
            WorkspaceCrawler::new(ctx)
                .crawl(&["acc404".to_string()])
                .await
                .is_err()
        );
    }
}
