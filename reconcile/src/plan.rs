//! Pure diff between a remote snapshot and a local snapshot.
//!
//! Nothing in this module performs I/O; the output is a
//! [`ReconciliationPlan`] that the batch driver applies later.

use crate::error::{ReconcileError, ReconcileResult};
use crate::model::{Attributes, ExternalKey, LocalRecord, RemoteEntity, SnapshotSide};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Partition of `remote ∪ local` into three disjoint, sorted key lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDiff<K> {
    pub create: Vec<K>,
    pub update: Vec<K>,
    pub delete: Vec<K>
}

/// `create = R − L`, `update = R ∩ L`, `delete = L − R`.
///
/// Membership is hash-based; each list is sorted afterwards so batches and
/// logs are reproducible.
pub fn diff_keys<K: ExternalKey>(remote: &HashSet<K>, local: &HashSet<K>) -> KeyDiff<K> {
    let mut create: Vec<K> = remote.difference(local).cloned().collect();
    let mut update: Vec<K> = remote.intersection(local).cloned().collect();
    let mut delete: Vec<K> = local.difference(remote).cloned().collect();

    create.sort();
    update.sort();
    delete.sort();

    KeyDiff {
        create,
        update,
        delete
    }
}

/// A key present on both sides: the current local record and the remote
/// entity whose attributes will overwrite it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdatePair<K, A> {
    pub current: LocalRecord<K, A>,
    pub desired: RemoteEntity<K, A>
}

impl<K, A: PartialEq> UpdatePair<K, A> {
    pub fn changes_attributes(&self) -> bool {
        self.current.attributes != self.desired.attributes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationPlan<K, A> {
    pub namespace: String,
    pub to_create: Vec<RemoteEntity<K, A>>,
    pub to_update: Vec<UpdatePair<K, A>>,
    pub to_delete: Vec<LocalRecord<K, A>>
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    /// Updates whose remote attributes equal the local ones.
    pub unchanged: usize
}

impl PlanSummary {
    /// Number of operations that would actually alter local state.
    pub fn effective_changes(&self) -> usize {
        self.create + self.delete + (self.update - self.unchanged)
    }
}

impl<K: ExternalKey, A: Attributes> ReconciliationPlan<K, A> {
    /// Validates both snapshots and joins the key diff back to full
    /// entities and records.
    ///
    /// Fails on entities outside `namespace` and on repeated external keys
    /// in either snapshot; a repeated remote key is never resolved by
    /// picking one of the duplicates.
    pub fn build(
        namespace: &str,
        remote: Vec<RemoteEntity<K, A>>,
        local: Vec<LocalRecord<K, A>>
    ) -> ReconcileResult<Self> {
        let mut remote_index = index_remote(namespace, remote)?;
        let mut local_index = index_local(namespace, local)?;

        let remote_keys: HashSet<K> = remote_index.keys().cloned().collect();
        let local_keys: HashSet<K> = local_index.keys().cloned().collect();
        let diff = diff_keys(&remote_keys, &local_keys);

        let to_create = diff
            .create
            .iter()
            .filter_map(|key| remote_index.remove(key))
            .collect();

        let to_update = diff
            .update
            .iter()
            .filter_map(|key| {
                let current = local_index.remove(key)?;
                let desired = remote_index.remove(key)?;
                Some(UpdatePair { current, desired })
            })
            .collect();

        let to_delete = diff
            .delete
            .iter()
            .filter_map(|key| local_index.remove(key))
            .collect();

        Ok(Self {
            namespace: namespace.to_string(),
            to_create,
            to_update,
            to_delete
        })
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.to_create.len(),
            update: self.to_update.len(),
            delete: self.to_delete.len(),
            unchanged: self
                .to_update
                .iter()
                .filter(|pair| !pair.changes_attributes())
                .count()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// True when applying the plan would leave the local state as it is.
    pub fn is_noop(&self) -> bool {
        self.summary().effective_changes() == 0
    }

    /// True when the remote snapshot was empty and the plan deletes every
    /// local record of the namespace.
    pub fn is_full_wipe(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && !self.to_delete.is_empty()
    }

    /// Internal IDs of the records to delete, in plan order.
    pub fn delete_ids(&self) -> Vec<String> {
        self.to_delete
            .iter()
            .map(|record| record.internal_id.clone())
            .collect()
    }
}

fn index_remote<K: ExternalKey, A>(
    namespace: &str,
    remote: Vec<RemoteEntity<K, A>>
) -> ReconcileResult<HashMap<K, RemoteEntity<K, A>>> {
    let mut index = HashMap::with_capacity(remote.len());

    for entity in remote {
        if entity.namespace != namespace {
            return Err(ReconcileError::RemoteFetch {
                namespace: namespace.to_string(),
                source: format!(
                    "entity {} belongs to namespace {}",
                    entity.external_key, entity.namespace
                )
                .into()
            });
        }

        let key = entity.external_key.clone();
        if index.insert(key.clone(), entity).is_some() {
            return Err(ReconcileError::DuplicateExternalKey {
                namespace: namespace.to_string(),
                key: key.to_string(),
                side: SnapshotSide::Remote
            });
        }
    }

    Ok(index)
}

fn index_local<K: ExternalKey, A>(
    namespace: &str,
    local: Vec<LocalRecord<K, A>>
) -> ReconcileResult<HashMap<K, LocalRecord<K, A>>> {
    let mut index = HashMap::with_capacity(local.len());

    for record in local {
        if record.namespace != namespace {
            return Err(ReconcileError::LocalFetch {
                namespace: namespace.to_string(),
                source: format!(
                    "record {} belongs to namespace {}",
                    record.internal_id, record.namespace
                )
                .into()
            });
        }

        let key = record.external_key.clone();
        if index.insert(key.clone(), record).is_some() {
            return Err(ReconcileError::DuplicateExternalKey {
                namespace: namespace.to_string(),
                key: key.to_string(),
                side: SnapshotSide::Local
            });
        }
    }

    Ok(index)
}
