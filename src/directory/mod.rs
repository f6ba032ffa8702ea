pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub use memory::MemoryDirectory;

/// Stored user. Fields other than `id` and `name` are carried as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

/// Client-supplied body for create and update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserDraft {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

#[derive(Debug, Error)]
#[error("invalid user: {0}")]
pub struct InvalidUser(pub String);

impl UserDraft {
    /// Bind the draft to `id`. A client-sent `id` field is discarded.
    pub fn into_record(mut self, id: Uuid) -> Result<UserRecord, InvalidUser> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(InvalidUser("name must not be empty".to_string()));
        }
        let name = name.to_string();
        self.profile.remove("id");

        Ok(UserRecord {
            id,
            name,
            profile: self.profile,
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {0} already exists")]
    Conflict(Uuid),

    #[error("unsupported directory backend '{0}'")]
    UnsupportedBackend(String),

    #[error("directory backend failure: {0}")]
    Backend(String),
}

/// CRUD surface of the backing document store.
///
/// Lookups return `Ok(None)` / `Ok(false)` for a missing record; `Err` is
/// reserved for storage failures. Each call is atomic for a single record only.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn create(&self, record: UserRecord) -> Result<UserRecord, StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn list_all(&self) -> Result<Vec<UserRecord>, StoreError>;

    async fn update(&self, id: Uuid, record: UserRecord)
        -> Result<Option<UserRecord>, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Pick a directory adapter from the connection string's scheme.
pub fn open(connection_string: &str) -> Result<Arc<dyn DirectoryStore>, StoreError> {
    let scheme = connection_string
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .unwrap_or_default();

    match scheme.as_str() {
        "memory" => {
            info!(backend = "memory", "directory store opened");
            Ok(Arc::new(MemoryDirectory::new()))
        }
        "" => Err(StoreError::UnsupportedBackend("<no scheme>".to_string())),
        other => Err(StoreError::UnsupportedBackend(other.to_string())),
    }
}
