use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DirectoryStore, StoreError, UserRecord};

/// In-process directory. Records keep insertion order, so name lookups
/// return the oldest match.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    records: Arc<RwLock<Vec<UserRecord>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectory {
    async fn create(&self, record: UserRecord) -> Result<UserRecord, StoreError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::Conflict(record.id));
        }
        records.push(record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<UserRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.name == name).cloned())
    }

    async fn list_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        Ok(self.records.read().await.clone())
    }

    async fn update(
        &self,
        id: Uuid,
        mut record: UserRecord,
    ) -> Result<Option<UserRecord>, StoreError> {
        record.id = id;
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }
}
