//! In-memory Airtable implementation
//!
//! Holds a scripted remote tree (accounts, workspaces, bases, tables,
//! records, attachment bytes) and can inject failures per call. Every call
//! is logged so tests can assert which resources were touched.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use super::api::{
    BaseDetail, EnterpriseAccount, PermissionLevel, RecordPage, RemoteRecord, TableSchema,
    WorkspaceDetail,
};
use super::{AirtableApi, ApiError};

/// A call made against the mock, also used as the key for injected failures
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MockCall {
    Account(String),
    Workspace(String),
    Base(String),
    Grant(String),
    Revoke(String),
    Tables(String),
    /// Page index is zero-based
    Records {
        base_id: String,
        table_id: String,
        page: usize,
    },
    Download(String),
}

impl MockCall {
    /// The base this call touches, if any
    pub fn base_id(&self) -> Option<&str> {
        match self {
            MockCall::Base(id)
            | MockCall::Grant(id)
            | MockCall::Revoke(id)
            | MockCall::Tables(id) => Some(id),
            MockCall::Records { base_id, .. } => Some(base_id),
            _ => None,
        }
    }
}

/// Injected failure; `remaining == None` fails forever
struct Failure {
    error: ApiError,
    remaining: Option<usize>,
}

#[derive(Default)]
struct MockState {
    accounts: HashMap<String, EnterpriseAccount>,
    workspaces: HashMap<String, WorkspaceDetail>,
    bases: HashMap<String, BaseDetail>,
    tables: HashMap<String, Vec<TableSchema>>,
    records: HashMap<(String, String), Vec<RemoteRecord>>,
    attachments: HashMap<String, Vec<u8>>,
    grants: HashSet<(String, String)>,
    failures: HashMap<MockCall, Failure>,
    calls: Vec<MockCall>,
}

/// Scriptable in-memory remote
pub struct MockAirtable {
    state: Mutex<MockState>,
    page_size: usize,
}

impl MockAirtable {
    /// Create an empty remote serving `page_size` records per page
    pub fn new(page_size: usize) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            page_size: page_size.max(1),
        }
    }

    /// Add a workspace to an account, linking its bases
    pub fn add_workspace(&self, account_id: &str, workspace: WorkspaceDetail) {
        let mut state = self.state.lock().unwrap();
        let account = state
            .accounts
            .entry(account_id.to_string())
            .or_insert_with(|| EnterpriseAccount {
                id: account_id.to_string(),
                ..Default::default()
            });
        if !account.workspace_ids.contains(&workspace.id) {
            account.workspace_ids.push(workspace.id.clone());
        }
        state.workspaces.insert(workspace.id.clone(), workspace);
    }

    /// Add a base; it must also be listed in a workspace's `base_ids` to be crawled
    pub fn add_base(&self, base: BaseDetail) {
        let mut state = self.state.lock().unwrap();
        state.tables.entry(base.id.clone()).or_default();
        state.bases.insert(base.id.clone(), base);
    }

    pub fn add_table(&self, base_id: &str, table: TableSchema) {
        let mut state = self.state.lock().unwrap();
        state
            .records
            .entry((base_id.to_string(), table.id.clone()))
            .or_default();
        state
            .tables
            .entry(base_id.to_string())
            .or_default()
            .push(table);
    }

    pub fn add_records(&self, base_id: &str, table_id: &str, records: Vec<RemoteRecord>) {
        let mut state = self.state.lock().unwrap();
        state
            .records
            .entry((base_id.to_string(), table_id.to_string()))
            .or_default()
            .extend(records);
    }

    /// Replace the content of a record, keeping its position
    pub fn update_record(&self, base_id: &str, table_id: &str, record: RemoteRecord) {
        let mut state = self.state.lock().unwrap();
        if let Some(records) = state
            .records
            .get_mut(&(base_id.to_string(), table_id.to_string()))
            && let Some(existing) = records.iter_mut().find(|r| r.id == record.id)
        {
            *existing = record;
        }
    }

    pub fn remove_record(&self, base_id: &str, table_id: &str, record_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(records) = state
            .records
            .get_mut(&(base_id.to_string(), table_id.to_string()))
        {
            records.retain(|r| r.id != record_id);
        }
    }

    /// Delete a base upstream: detail and grant calls answer not-found
    pub fn remove_base(&self, base_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.bases.remove(base_id);
        state.tables.remove(base_id);
        state.records.retain(|(b, _), _| b != base_id);
        for ws in state.workspaces.values_mut() {
            ws.base_ids.retain(|id| id != base_id);
        }
    }

    pub fn add_attachment(&self, url: &str, content: impl Into<Vec<u8>>) {
        let mut state = self.state.lock().unwrap();
        state.attachments.insert(url.to_string(), content.into());
    }

    /// Fail the given call `times` times (`None` = always)
    pub fn fail(&self, call: MockCall, error: ApiError, times: Option<usize>) {
        let mut state = self.state.lock().unwrap();
        state.failures.insert(
            call,
            Failure {
                error,
                remaining: times,
            },
        );
    }

    /// Remove every injected failure
    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of calls that touched the given base
    pub fn calls_for_base(&self, base_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.base_id() == Some(base_id))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Outstanding (base, user) grants
    pub fn active_grants(&self) -> Vec<(String, String)> {
        let state = self.state.lock().unwrap();
        let mut grants: Vec<_> = state.grants.iter().cloned().collect();
        grants.sort();
        grants
    }

    /// Log the call and return an injected failure if one is armed
    fn enter(&self, call: MockCall) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.clone());

        let Some(failure) = state.failures.get_mut(&call) else {
            return Ok(());
        };
        let error = failure.error.clone();
        match failure.remaining {
            None => Err(error),
            Some(0) => Ok(()),
            Some(ref mut n) => {
                *n -= 1;
                Err(error)
            }
        }
    }
}

impl Default for MockAirtable {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl AirtableApi for MockAirtable {
    async fn get_enterprise_account(&self, account_id: &str) -> Result<EnterpriseAccount, ApiError> {
        self.enter(MockCall::Account(account_id.to_string()))?;
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("enterprise account {account_id}")))
    }

    async fn get_workspace(&self, workspace_id: &str) -> Result<WorkspaceDetail, ApiError> {
        self.enter(MockCall::Workspace(workspace_id.to_string()))?;
        let state = self.state.lock().unwrap();
        state
            .workspaces
            .get(workspace_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("workspace {workspace_id}")))
    }

    async fn get_base(&self, base_id: &str) -> Result<BaseDetail, ApiError> {
        self.enter(MockCall::Base(base_id.to_string()))?;
        let state = self.state.lock().unwrap();
        state
            .bases
            .get(base_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("base {base_id}")))
    }

    async fn grant_base_access(
        &self,
        base_id: &str,
        user_id: &str,
        _permission: PermissionLevel,
    ) -> Result<(), ApiError> {
        self.enter(MockCall::Grant(base_id.to_string()))?;
        let mut state = self.state.lock().unwrap();
        if !state.bases.contains_key(base_id) {
            return Err(ApiError::NotFound(format!("base {base_id}")));
        }
        state
            .grants
            .insert((base_id.to_string(), user_id.to_string()));
        Ok(())
    }

    async fn revoke_base_access(&self, base_id: &str, user_id: &str) -> Result<(), ApiError> {
        self.enter(MockCall::Revoke(base_id.to_string()))?;
        let mut state = self.state.lock().unwrap();
        state
            .grants
            .remove(&(base_id.to_string(), user_id.to_string()));
        Ok(())
    }

    async fn list_tables(&self, base_id: &str) -> Result<Vec<TableSchema>, ApiError> {
        self.enter(MockCall::Tables(base_id.to_string()))?;
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(base_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("base {base_id}")))
    }

    async fn list_records(
        &self,
        base_id: &str,
        table_id: &str,
        offset: Option<&str>,
    ) -> Result<RecordPage, ApiError> {
        let page = match offset {
            None => 0,
            Some(token) => token
                .strip_prefix("page")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| ApiError::Status {
                    status: 422,
                    message: format!("invalid offset {token:?}"),
                })?,
        };

        self.enter(MockCall::Records {
            base_id: base_id.to_string(),
            table_id: table_id.to_string(),
            page,
        })?;

        let state = self.state.lock().unwrap();
        let records = state
            .records
            .get(&(base_id.to_string(), table_id.to_string()))
            .ok_or_else(|| ApiError::NotFound(format!("table {base_id}/{table_id}")))?;

        let start = page * self.page_size;
        let end = (start + self.page_size).min(records.len());
        let chunk = records.get(start..end).unwrap_or_default().to_vec();
        let offset = (end < records.len()).then(|| format!("page{}", page + 1));

        Ok(RecordPage {
            records: chunk,
            offset,
        })
    }

    async fn download_attachment(&self, url: &str, dest: &Path) -> Result<u64, ApiError> {
        self.enter(MockCall::Download(url.to_string()))?;
        let content = {
            let state = self.state.lock().unwrap();
            state
                .attachments
                .get(url)
                .cloned()
                .ok_or_else(|| ApiError::NotFound(format!("attachment {url}")))?
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &content).await?;
        Ok(content.len() as u64)
    }
}
