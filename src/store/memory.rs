//! In-process denylist store.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{DenylistRecord, DenylistStore, StoreError};
use crate::ratelimit::ActorId;

/// A denylist store kept in memory, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryDenylistStore {
    records: DashMap<ActorId, DenylistRecord>,
}

impl MemoryDenylistStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl DenylistStore for MemoryDenylistStore {
    async fn create(&self, record: DenylistRecord) -> Result<(), StoreError> {
        self.records.insert(record.id, record);
        Ok(())
    }

    async fn lookup(&self, id: ActorId) -> Result<Option<DenylistRecord>, StoreError> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn delete(&self, id: ActorId) -> Result<bool, StoreError> {
        Ok(self.records.remove(&id).is_some())
    }

    async fn list(&self) -> Result<Vec<DenylistRecord>, StoreError> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: u64) -> DenylistRecord {
        DenylistRecord {
            id: ActorId(id),
            violations: 10,
            denied_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_lookup_delete() {
        let store = MemoryDenylistStore::new();
        assert!(store.is_empty());

        store.create(record(1)).await.unwrap();
        assert_eq!(store.lookup(ActorId(1)).await.unwrap().map(|r| r.id), Some(ActorId(1)));

        assert!(store.delete(ActorId(1)).await.unwrap());
        assert!(!store.delete(ActorId(1)).await.unwrap());
        assert!(store.lookup(ActorId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_is_sorted_by_id() {
        let store = MemoryDenylistStore::new();
        store.create(record(9)).await.unwrap();
        store.create(record(3)).await.unwrap();

        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![3, 9]);
        assert_eq!(store.len(), 2);
    }
}
