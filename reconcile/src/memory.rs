use crate::adapter::LocalStore;
use crate::error::AdapterError;
use crate::model::{Attributes, ExternalKey, LocalRecord, RemoteEntity};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory [`LocalStore`] keyed by internal ID.
///
/// Enforces the same uniqueness contract as a real table: one live record
/// per `(namespace, external_key)`.
pub struct MemoryStore<K, A> {
    records: RwLock<HashMap<String, LocalRecord<K, A>>>
}

impl<K, A> Default for MemoryStore<K, A> {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new())
        }
    }
}

impl<K: ExternalKey, A: Attributes> MemoryStore<K, A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with existing records, keeping their IDs.
    pub fn with_records(records: impl IntoIterator<Item = LocalRecord<K, A>>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.internal_id.clone(), record))
            .collect();

        Self {
            records: RwLock::new(records)
        }
    }

    /// Records of `namespace`, sorted by external key.
    pub async fn snapshot(&self, namespace: &str) -> Vec<LocalRecord<K, A>> {
        let records = self.records.read().await;
        let mut snapshot: Vec<_> = records
            .values()
            .filter(|record| record.namespace == namespace)
            .cloned()
            .collect();
        snapshot.sort_by(|a, b| a.external_key.cmp(&b.external_key));
        snapshot
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl<K: ExternalKey, A: Attributes> LocalStore<K, A> for MemoryStore<K, A> {
    async fn fetch_all_by_namespace(
        &self,
        namespace: &str
    ) -> Result<Vec<LocalRecord<K, A>>, AdapterError> {
        Ok(self.snapshot(namespace).await)
    }

    async fn create_batch(
        &self,
        records: &[RemoteEntity<K, A>],
        _batch_size: usize
    ) -> Result<(), AdapterError> {
        let mut stored = self.records.write().await;

        let mut taken: HashSet<(String, K)> = stored
            .values()
            .map(|record| (record.namespace.clone(), record.external_key.clone()))
            .collect();
        for entity in records {
            if !taken.insert((entity.namespace.clone(), entity.external_key.clone())) {
                return Err(format!(
                    "unique violation: {}/{} already exists",
                    entity.namespace, entity.external_key
                )
                .into());
            }
        }

        let now = Utc::now();
        for entity in records {
            let internal_id = Uuid::new_v4().to_string();
            stored.insert(
                internal_id.clone(),
                LocalRecord {
                    internal_id,
                    namespace: entity.namespace.clone(),
                    external_key: entity.external_key.clone(),
                    attributes: entity.attributes.clone(),
                    created_at: now,
                    updated_at: now
                }
            );
        }

        Ok(())
    }

    async fn delete_batch_by_internal_id(&self, ids: &[String]) -> Result<(), AdapterError> {
        let mut stored = self.records.write().await;
        for id in ids {
            stored.remove(id);
        }
        Ok(())
    }

    async fn update_one(
        &self,
        old: &LocalRecord<K, A>,
        new: &LocalRecord<K, A>
    ) -> Result<(), AdapterError> {
        if old.internal_id != new.internal_id || old.external_key != new.external_key {
            return Err(format!("update may not change identity of {}", old.internal_id).into());
        }

        let mut stored = self.records.write().await;
        match stored.get_mut(&old.internal_id) {
            Some(record) => {
                *record = new.clone();
                Ok(())
            }
            None => Err(format!("record {} not found", old.internal_id).into())
        }
    }
}
