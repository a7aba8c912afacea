use crate::error::{TagSyncError, TagSyncResult};
use async_trait::async_trait;
use distributed_lock::{
    DistributedLock, LockHandle, LockProvider, RedisLockHandle, RedisLockProvider
};
use metrics::counter;
use reconcile::{AdapterError, NamespaceGuard, NamespaceLease};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Redis-backed namespace lock, shared by every process syncing the same
/// accounts.
pub struct RedisNamespaceGuard {
    provider: Arc<RedisLockProvider>,
    busy_wait: Duration
}

/// Releases on drop too, so a cancelled run frees the key without waiting
/// for the provider's expiry. A crashed process still holds it until then.
struct RedisLease {
    key: String,
    handle: Option<RedisLockHandle>
}

pub fn lock_key(namespace: &str) -> String {
    format!("tag_sync_lock:{}", namespace)
}

impl RedisNamespaceGuard {
    pub async fn connect(redis_url: &str, busy_wait: Duration) -> TagSyncResult<Self> {
        let provider = RedisLockProvider::new(redis_url)
            .await
            .map_err(|e| TagSyncError::LockError(e.to_string()))?;
        Ok(Self::new(Arc::new(provider), busy_wait))
    }

    /// `busy_wait` is how long a `reject` run tries before reporting the
    /// namespace busy.
    pub fn new(provider: Arc<RedisLockProvider>, busy_wait: Duration) -> Self {
        Self {
            provider,
            busy_wait
        }
    }
}

#[async_trait]
impl NamespaceGuard for RedisNamespaceGuard {
    async fn acquire(
        &self,
        namespace: &str,
        wait: Option<Duration>
    ) -> Result<Option<Box<dyn NamespaceLease>>, AdapterError> {
        let key = lock_key(namespace);
        let lock = self.provider.create_lock(&key);

        match lock.acquire(Some(wait.unwrap_or(self.busy_wait))).await {
            Ok(handle) => {
                debug!(lock_key = %key, "Namespace lock acquired");
                Ok(Some(Box::new(RedisLease {
                    key,
                    handle: Some(handle)
                })))
            }
            Err(distributed_lock::LockError::Timeout(_)) => Ok(None),
            Err(e) => Err(TagSyncError::LockError(e.to_string()).into())
        }
    }
}

#[async_trait]
impl NamespaceLease for RedisLease {
    async fn release(mut self: Box<Self>) -> Result<(), AdapterError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if let Err(e) = handle.release().await {
            counter!("tag_sync_lock_release_failures_total").increment(1);
            return Err(TagSyncError::LockError(format!("{}: {}", self.key, e)).into());
        }
        debug!(lock_key = %self.key, "Namespace lock released");
        Ok(())
    }
}

impl Drop for RedisLease {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(lock_key = %self.key, "No runtime to release namespace lock; it will expire");
            return;
        };
        let key = self.key.clone();
        runtime.spawn(async move {
            match handle.release().await {
                Ok(()) => debug!(lock_key = %key, "Dropped namespace lock released"),
                Err(e) => {
                    counter!("tag_sync_lock_release_failures_total").increment(1);
                    warn!(lock_key = %key, error = %e, "Failed to release dropped namespace lock");
                }
            }
        });
    }
}
