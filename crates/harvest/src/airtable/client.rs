//! Airtable HTTP client
//!
//! Requests are made with blocking HTTP (ureq) on tokio's blocking pool so
//! the sync engine stays free of a particular HTTP stack.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use super::api::{
    BaseDetail, EnterpriseAccount, ListTablesResponse, PermissionLevel, RecordPage, TableSchema,
    WorkspaceDetail,
};
use super::{AirtableApi, ApiError};

/// Maximum page size accepted by the records endpoint
const PAGE_SIZE: usize = 100;

/// Airtable API client
#[derive(Clone)]
pub struct AirtableClient {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl AirtableClient {
    /// Default API root
    pub const DEFAULT_BASE_URL: &'static str = "https://api.airtable.com/v0";

    /// Create a client for the given API root and personal access token
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid API base URL {base_url:?}: {e}"))?;

        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Ok(Self {
            agent,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn meta_url(&self, path: &str) -> String {
        format!("{}/meta/{}", self.base_url, path)
    }

    /// Run a blocking request on the blocking pool
    async fn blocking<T, F>(f: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Result<T, ApiError> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| ApiError::Transport(format!("blocking task failed: {e}")))?
    }

    async fn get_json<T>(&self, url: String, what: String) -> Result<T, ApiError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let agent = self.agent.clone();
        let auth = format!("Bearer {}", self.token);

        Self::blocking(move || {
            let mut response = agent
                .get(&url)
                .header("Authorization", &auth)
                .call()
                .map_err(|e| classify(e, &what))?;

            let body = response
                .body_mut()
                .read_to_string()
                .map_err(|e| classify(e, &what))?;

            serde_json::from_str(&body).map_err(|e| ApiError::Decode(format!("{what}: {e}")))
        })
        .await
    }
}

/// Map a ureq error onto the API error taxonomy
fn classify(err: ureq::Error, what: &str) -> ApiError {
    match err {
        ureq::Error::StatusCode(status) => ApiError::from_status(status, what),
        ureq::Error::Timeout(t) => ApiError::Timeout(format!("{what}: {t:?}")),
        ureq::Error::Io(e) if e.kind() == io::ErrorKind::TimedOut => {
            ApiError::Timeout(format!("{what}: {e}"))
        }
        other => ApiError::Transport(format!("{what}: {other}")),
    }
}

/// Temporary sibling path used while a download is in flight
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

#[async_trait]
impl AirtableApi for AirtableClient {
    async fn get_enterprise_account(&self, account_id: &str) -> Result<EnterpriseAccount, ApiError> {
        let url = self.meta_url(&format!(
            "enterpriseAccounts/{}",
            urlencoding::encode(account_id)
        ));
        self.get_json(url, format!("enterprise account {account_id}"))
            .await
    }

    async fn get_workspace(&self, workspace_id: &str) -> Result<WorkspaceDetail, ApiError> {
        let url = self.meta_url(&format!(
            "workspaces/{}?include=collaborators",
            urlencoding::encode(workspace_id)
        ));
        self.get_json(url, format!("workspace {workspace_id}")).await
    }

    async fn get_base(&self, base_id: &str) -> Result<BaseDetail, ApiError> {
        let url = self.meta_url(&format!("bases/{}", urlencoding::encode(base_id)));
        self.get_json(url, format!("base {base_id}")).await
    }

    async fn grant_base_access(
        &self,
        base_id: &str,
        user_id: &str,
        permission: PermissionLevel,
    ) -> Result<(), ApiError> {
        let url = self.meta_url(&format!(
            "bases/{}/collaborators",
            urlencoding::encode(base_id)
        ));
        let body = json!({
            "collaborators": [{
                "user": { "id": user_id },
                "permissionLevel": permission.as_str(),
            }]
        });
        let what = format!("grant {user_id} on base {base_id}");
        let agent = self.agent.clone();
        let auth = format!("Bearer {}", self.token);

        Self::blocking(move || {
            agent
                .post(&url)
                .header("Authorization", &auth)
                .send_json(&body)
                .map_err(|e| classify(e, &what))?;
            Ok(())
        })
        .await
    }

    async fn revoke_base_access(&self, base_id: &str, user_id: &str) -> Result<(), ApiError> {
        let url = self.meta_url(&format!(
            "bases/{}/collaborators/{}",
            urlencoding::encode(base_id),
            urlencoding::encode(user_id)
        ));
        let what = format!("revoke {user_id} on base {base_id}");
        let agent = self.agent.clone();
        let auth = format!("Bearer {}", self.token);

        Self::blocking(move || {
            agent
                .delete(&url)
                .header("Authorization", &auth)
                .call()
                .map_err(|e| classify(e, &what))?;
            Ok(())
        })
        .await
    }

    async fn list_tables(&self, base_id: &str) -> Result<Vec<TableSchema>, ApiError> {
        let url = self.meta_url(&format!("bases/{}/tables", urlencoding::encode(base_id)));
        let response: ListTablesResponse = self
            .get_json(url, format!("tables of base {base_id}"))
            .await?;
        Ok(response.tables)
    }

    async fn list_records(
        &self,
        base_id: &str,
        table_id: &str,
        offset: Option<&str>,
    ) -> Result<RecordPage, ApiError> {
        let mut url = format!(
            "{}/{}/{}?pageSize={}",
            self.base_url,
            urlencoding::encode(base_id),
            urlencoding::encode(table_id),
            PAGE_SIZE
        );

        if let Some(offset) = offset {
            url.push_str(&format!("&offset={}", urlencoding::encode(offset)));
        }

        self.get_json(url, format!("records of {base_id}/{table_id}"))
            .await
    }

    async fn download_attachment(&self, url: &str, dest: &Path) -> Result<u64, ApiError> {
        let agent = self.agent.clone();
        let url = url.to_string();
        let dest = dest.to_path_buf();

        Self::blocking(move || {
            let what = format!("attachment {}", dest.display());
            let mut response = agent.get(&url).call().map_err(|e| classify(e, &what))?;

            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }

            // Write to a sibling temp file, then rename into place
            let temp_path = partial_path(&dest);
            let written = {
                let mut file = fs::File::create(&temp_path)?;
                let mut reader = response.body_mut().as_reader();
                io::copy(&mut reader, &mut file)?
            };
            fs::rename(&temp_path, &dest)?;

            Ok(written)
        })
        .await
    }
}
