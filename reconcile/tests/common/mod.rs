#![allow(dead_code)]

use async_trait::async_trait;
use reconcile::{
    ActionKind, AdapterError, LocalRecord, LocalStore, MemoryStore, RemoteEntity, RemoteSource
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub type Tag = RemoteEntity<i32, String>;

pub fn tag(namespace: &str, id: i32, name: &str) -> Tag {
    RemoteEntity::new(namespace, id, name.to_string())
}

/// A row that already exists in the mirror under a known internal ID.
pub fn mirrored(
    internal_id: &str,
    namespace: &str,
    id: i32,
    name: &str
) -> LocalRecord<i32, String> {
    let now = chrono::Utc::now();
    LocalRecord {
        internal_id: internal_id.to_string(),
        namespace: namespace.to_string(),
        external_key: id,
        attributes: name.to_string(),
        created_at: now,
        updated_at: now
    }
}

/// Remote catalog whose snapshot can be swapped between runs.
#[derive(Default)]
pub struct FakeRemote {
    snapshots: Mutex<HashMap<String, Vec<Tag>>>,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    pub calls: AtomicUsize
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, namespace: &str, entries: &[(i32, &str)]) {
        let tags = entries
            .iter()
            .map(|(id, name)| tag(namespace, *id, name))
            .collect();
        self.snapshots
            .lock()
            .unwrap()
            .insert(namespace.to_string(), tags);
    }

    pub fn fail(&self, namespace: &str) {
        self.failing.lock().unwrap().insert(namespace.to_string());
    }

    pub fn slow(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl RemoteSource<i32, String> for FakeRemote {
    async fn fetch_all(&self, namespace: &str) -> Result<Vec<Tag>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(namespace) {
            return Err("remote catalog unavailable".into());
        }
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}

/// Wraps a [`MemoryStore`] and fails selected primitives on demand.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore<i32, String>,
    failing: Mutex<HashSet<ActionKind>>,
    fail_fetch: Mutex<bool>,
    pub writes: AtomicUsize
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<LocalRecord<i32, String>>) -> Self {
        Self {
            inner: MemoryStore::with_records(records),
            ..Self::default()
        }
    }

    pub fn fail(&self, kind: ActionKind) {
        self.failing.lock().unwrap().insert(kind);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
        *self.fail_fetch.lock().unwrap() = false;
    }

    pub fn fail_fetch(&self) {
        *self.fail_fetch.lock().unwrap() = true;
    }

    fn check(&self, kind: ActionKind) -> Result<(), AdapterError> {
        if self.failing.lock().unwrap().contains(&kind) {
            return Err(format!("{} primitive unavailable", kind).into());
        }
        Ok(())
    }

    pub async fn keys(&self, namespace: &str) -> Vec<i32> {
        self.inner
            .snapshot(namespace)
            .await
            .iter()
            .map(|record| record.external_key)
            .collect()
    }

    pub async fn names(&self, namespace: &str) -> Vec<(i32, String)> {
        self.inner
            .snapshot(namespace)
            .await
            .into_iter()
            .map(|record| (record.external_key, record.attributes))
            .collect()
    }

    pub async fn seed(&self, namespace: &str, entries: &[(i32, &str)]) {
        let tags: Vec<Tag> = entries
            .iter()
            .map(|(id, name)| tag(namespace, *id, name))
            .collect();
        self.inner.create_batch(&tags, 100).await.unwrap();
    }
}

#[async_trait]
impl LocalStore<i32, String> for FlakyStore {
    async fn fetch_all_by_namespace(
        &self,
        namespace: &str
    ) -> Result<Vec<LocalRecord<i32, String>>, AdapterError> {
        if *self.fail_fetch.lock().unwrap() {
            return Err("local store unreachable".into());
        }
        self.inner.fetch_all_by_namespace(namespace).await
    }

    async fn create_batch(&self, records: &[Tag], batch_size: usize) -> Result<(), AdapterError> {
        self.check(ActionKind::Create)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.create_batch(records, batch_size).await
    }

    async fn delete_batch_by_internal_id(&self, ids: &[String]) -> Result<(), AdapterError> {
        self.check(ActionKind::Delete)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_batch_by_internal_id(ids).await
    }

    async fn update_one(
        &self,
        old: &LocalRecord<i32, String>,
        new: &LocalRecord<i32, String>
    ) -> Result<(), AdapterError> {
        self.check(ActionKind::Update)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_one(old, new).await
    }
}
