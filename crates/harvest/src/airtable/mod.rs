//! Airtable API integration
//!
//! This module provides:
//! - The `AirtableApi` trait the sync engine is written against
//! - An HTTP client implementing it
//! - An in-memory implementation for tests and dry runs
//! - Wire types for the metadata and records endpoints

mod client;
mod error;
mod mock;
mod traits;

pub use client::AirtableClient;
pub use error::ApiError;
pub use mock::{MockAirtable, MockCall};
pub use traits::AirtableApi;

/// Airtable API response types
pub mod api {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use serde_json::{Map, Value};

    /// Permission level granting ownership of a workspace
    pub const OWNER_PERMISSION: &str = "owner";

    /// Field type whose values are attachment descriptor arrays
    pub const ATTACHMENT_FIELD_TYPE: &str = "multipleAttachments";

    /// Enterprise account introspection
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct EnterpriseAccount {
        pub id: String,
        #[serde(default)]
        pub workspace_ids: Vec<String>,
        #[serde(default)]
        pub user_ids: Vec<String>,
    }

    /// Workspace detail including collaborators
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WorkspaceDetail {
        pub id: String,
        pub name: String,
        pub created_time: DateTime<Utc>,
        #[serde(default)]
        pub base_ids: Vec<String>,
        #[serde(default)]
        pub collaborators: Collaborators,
    }

    impl WorkspaceDetail {
        pub fn new(id: impl Into<String>, name: impl Into<String>, created_time: DateTime<Utc>) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                created_time,
                base_ids: Vec::new(),
                collaborators: Collaborators::default(),
            }
        }

        /// Comma-joined emails of collaborators holding the owner permission
        pub fn owner_emails(&self) -> String {
            self.collaborators
                .workspace_collaborators
                .iter()
                .filter(|c| c.permission_level == OWNER_PERMISSION)
                .map(|c| c.email.as_str())
                .collect::<Vec<_>>()
                .join(",")
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Collaborators {
        #[serde(default)]
        pub workspace_collaborators: Vec<Collaborator>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Collaborator {
        pub user_id: String,
        pub email: String,
        pub permission_level: String,
    }

    impl Collaborator {
        pub fn new(
            user_id: impl Into<String>,
            email: impl Into<String>,
            permission_level: impl Into<String>,
        ) -> Self {
            Self {
                user_id: user_id.into(),
                email: email.into(),
                permission_level: permission_level.into(),
            }
        }
    }

    /// Base detail
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BaseDetail {
        pub id: String,
        pub name: String,
        pub created_time: DateTime<Utc>,
    }

    impl BaseDetail {
        pub fn new(id: impl Into<String>, name: impl Into<String>, created_time: DateTime<Utc>) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                created_time,
            }
        }
    }

    /// Permission levels for base collaborators
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum PermissionLevel {
        Read,
        Comment,
        Edit,
        Create,
    }

    impl PermissionLevel {
        pub fn as_str(&self) -> &'static str {
            match self {
                PermissionLevel::Read => "read",
                PermissionLevel::Comment => "comment",
                PermissionLevel::Edit => "edit",
                PermissionLevel::Create => "create",
            }
        }
    }

    /// Response from the table metadata endpoint
    #[derive(Debug, Deserialize)]
    pub struct ListTablesResponse {
        #[serde(default)]
        pub tables: Vec<TableSchema>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TableSchema {
        pub id: String,
        pub name: String,
        #[serde(default)]
        pub fields: Vec<FieldSchema>,
    }

    impl TableSchema {
        pub fn new(id: impl Into<String>, name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                fields,
            }
        }

        /// Fields holding attachment descriptors
        pub fn attachment_fields(&self) -> impl Iterator<Item = &FieldSchema> {
            self.fields
                .iter()
                .filter(|f| f.field_type == ATTACHMENT_FIELD_TYPE)
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct FieldSchema {
        pub id: String,
        pub name: String,
        #[serde(rename = "type")]
        pub field_type: String,
    }

    impl FieldSchema {
        pub fn new(id: impl Into<String>, name: impl Into<String>, field_type: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                field_type: field_type.into(),
            }
        }
    }

    /// One page of records; `offset` links to the next page
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct RecordPage {
        #[serde(default)]
        pub records: Vec<RemoteRecord>,
        pub offset: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RemoteRecord {
        pub id: String,
        pub created_time: DateTime<Utc>,
        #[serde(default)]
        pub fields: Map<String, Value>,
    }

    impl RemoteRecord {
        pub fn new(id: impl Into<String>, created_time: DateTime<Utc>, fields: Value) -> Self {
            let fields = match fields {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            Self {
                id: id.into(),
                created_time,
                fields,
            }
        }

        /// Attachment descriptors held in the named field
        ///
        /// Malformed entries are ignored.
        pub fn attachments(&self, field_name: &str) -> Vec<AttachmentRef> {
            match self.fields.get(field_name) {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect(),
                _ => Vec::new(),
            }
        }
    }

    /// Attachment descriptor embedded in a record field
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct AttachmentRef {
        pub id: String,
        pub url: String,
        pub filename: String,
        #[serde(default)]
        pub size: Option<u64>,
        #[serde(rename = "type", default)]
        pub mime_type: Option<String>,
    }

}
