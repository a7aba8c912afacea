use crate::error::AdapterError;
use crate::model::{LocalRecord, RemoteEntity};
use async_trait::async_trait;

/// Authoritative side of a reconciliation.
#[async_trait]
pub trait RemoteSource<K, A>: Send + Sync {
    /// Returns the complete snapshot for `namespace`, or an error.
    ///
    /// Implementations must never return a partial list: a truncated
    /// snapshot is indistinguishable from a real shrink of the catalog and
    /// would turn into spurious deletes.
    async fn fetch_all(&self, namespace: &str) -> Result<Vec<RemoteEntity<K, A>>, AdapterError>;
}

/// Cache-backed local mirror.
///
/// Every write primitive is responsible for invalidating the cache entries
/// it touches; the engine never writes storage any other way.
#[async_trait]
pub trait LocalStore<K, A>: Send + Sync {
    async fn fetch_all_by_namespace(
        &self,
        namespace: &str
    ) -> Result<Vec<LocalRecord<K, A>>, AdapterError>;

    /// Inserts `records` atomically, assigning each one a fresh internal ID.
    async fn create_batch(
        &self,
        records: &[RemoteEntity<K, A>],
        batch_size: usize
    ) -> Result<(), AdapterError>;

    async fn delete_batch_by_internal_id(&self, ids: &[String]) -> Result<(), AdapterError>;

    /// Writes `new` over `old`. The pre-image is required for cache
    /// invalidation and change auditing.
    async fn update_one(
        &self,
        old: &LocalRecord<K, A>,
        new: &LocalRecord<K, A>
    ) -> Result<(), AdapterError>;
}
