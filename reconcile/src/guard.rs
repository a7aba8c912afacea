//! Per-namespace mutual exclusion.
//!
//! Two overlapping runs on one namespace could both read a stale local
//! snapshot and double-create or race a delete against a create, so a run
//! holds a lease for its namespace from the first fetch to the last batch.

use crate::error::AdapterError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Proof that the holder is the only run on a namespace.
#[async_trait]
pub trait NamespaceLease: Send {
    async fn release(self: Box<Self>) -> Result<(), AdapterError>;
}

#[async_trait]
pub trait NamespaceGuard: Send + Sync {
    /// Returns `Ok(None)` when another run holds the namespace: immediately
    /// if `wait` is `None`, otherwise once `wait` has elapsed.
    async fn acquire(
        &self,
        namespace: &str,
        wait: Option<Duration>
    ) -> Result<Option<Box<dyn NamespaceLease>>, AdapterError>;
}

type LockMap = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// In-process guard, sufficient when a single process owns all runs.
///
/// Only namespaces with a holder or a waiter keep an entry.
#[derive(Default)]
pub struct LocalNamespaceGuard {
    locks: LockMap
}

struct LocalLease {
    guard: Option<OwnedMutexGuard<()>>,
    namespace: String,
    locks: LockMap
}

#[async_trait]
impl NamespaceLease for LocalLease {
    async fn release(self: Box<Self>) -> Result<(), AdapterError> {
        Ok(())
    }
}

impl Drop for LocalLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        forget_if_idle(&self.locks, &self.namespace);
    }
}

/// The map's own reference is the last one: nobody holds or waits.
fn forget_if_idle(locks: &LockMap, namespace: &str) {
    locks.remove_if(namespace, |_, lock| Arc::strong_count(lock) == 1);
}

impl LocalNamespaceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespaces currently held or waited on.
    pub fn tracked_namespaces(&self) -> usize {
        self.locks.len()
    }

    fn lock_for(&self, namespace: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn busy(&self, lock: Arc<Mutex<()>>, namespace: &str) -> Option<Box<dyn NamespaceLease>> {
        drop(lock);
        forget_if_idle(&self.locks, namespace);
        None
    }
}

#[async_trait]
impl NamespaceGuard for LocalNamespaceGuard {
    async fn acquire(
        &self,
        namespace: &str,
        wait: Option<Duration>
    ) -> Result<Option<Box<dyn NamespaceLease>>, AdapterError> {
        let lock = self.lock_for(namespace);

        let guard = match wait {
            None => match lock.clone().try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => return Ok(self.busy(lock, namespace))
            },
            Some(timeout) => match tokio::time::timeout(timeout, lock.clone().lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => return Ok(self.busy(lock, namespace))
            }
        };

        Ok(Some(Box::new(LocalLease {
            guard: Some(guard),
            namespace: namespace.to_string(),
            locks: self.locks.clone()
        })))
    }
}
