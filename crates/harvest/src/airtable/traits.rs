//! Remote API trait

use std::path::Path;

use async_trait::async_trait;

use super::ApiError;
use super::api::{BaseDetail, EnterpriseAccount, PermissionLevel, RecordPage, TableSchema, WorkspaceDetail};

/// Operations the exporter needs from the remote API
///
/// Every call is a suspension point. Implementations must not retry on
/// their own; retrying is the caller's decision.
#[async_trait]
pub trait AirtableApi: Send + Sync {
    /// List member and workspace identifiers of an enterprise account
    async fn get_enterprise_account(&self, account_id: &str) -> Result<EnterpriseAccount, ApiError>;

    /// Workspace detail including collaborators and contained bases
    async fn get_workspace(&self, workspace_id: &str) -> Result<WorkspaceDetail, ApiError>;

    /// Base name and creation time
    async fn get_base(&self, base_id: &str) -> Result<BaseDetail, ApiError>;

    /// Add a user as collaborator on a base
    async fn grant_base_access(
        &self,
        base_id: &str,
        user_id: &str,
        permission: PermissionLevel,
    ) -> Result<(), ApiError>;

    /// Remove a user's base-level collaborator access
    async fn revoke_base_access(&self, base_id: &str, user_id: &str) -> Result<(), ApiError>;

    /// Table metadata with field definitions
    async fn list_tables(&self, base_id: &str) -> Result<Vec<TableSchema>, ApiError>;

    /// Fetch one page of records; `offset` is the cursor from the previous page
    async fn list_records(
        &self,
        base_id: &str,
        table_id: &str,
        offset: Option<&str>,
    ) -> Result<RecordPage, ApiError>;

    /// Stream attachment content to `dest`, returning the number of bytes written
    async fn download_attachment(&self, url: &str, dest: &Path) -> Result<u64, ApiError>;
}
