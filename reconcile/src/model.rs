use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Identifier assigned to an entity by the remote source of truth.
///
/// Blanket-implemented for every comparable scalar (integers, strings) so
/// adapters never implement it by hand. `Ord` is only used to sort plan
/// output; membership tests are hash-based.
pub trait ExternalKey: Clone + Eq + Hash + Ord + Debug + Display + Send + Sync + 'static {}

impl<T> ExternalKey for T where T: Clone + Eq + Hash + Ord + Debug + Display + Send + Sync + 'static {}

/// Attribute payload carried alongside an external key.
///
/// `PartialEq` is only used to report which updates actually change
/// anything; updates are written regardless.
pub trait Attributes: Clone + Debug + PartialEq + Send + Sync + 'static {}

impl<T> Attributes for T where T: Clone + Debug + PartialEq + Send + Sync + 'static {}

/// One entity of a remote snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntity<K, A> {
    pub namespace: String,
    pub external_key: K,
    pub attributes: A
}

impl<K, A> RemoteEntity<K, A> {
    pub fn new(namespace: impl Into<String>, external_key: K, attributes: A) -> Self {
        Self {
            namespace: namespace.into(),
            external_key,
            attributes
        }
    }
}

/// A persisted mirror of a remote entity.
///
/// `internal_id` is assigned by the local store on creation and never
/// changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecord<K, A> {
    pub internal_id: String,
    pub namespace: String,
    pub external_key: K,
    pub attributes: A,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>
}

impl<K: Clone, A: Clone> LocalRecord<K, A> {
    /// Returns the post-image of an update: same identity, remote attributes.
    pub fn with_attributes(&self, attributes: A, updated_at: DateTime<Utc>) -> Self {
        Self {
            internal_id: self.internal_id.clone(),
            namespace: self.namespace.clone(),
            external_key: self.external_key.clone(),
            attributes,
            created_at: self.created_at,
            updated_at
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Update,
    Delete
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [ActionKind::Create, ActionKind::Update, ActionKind::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete"
        }
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which snapshot a validation failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSide {
    Remote,
    Local
}

impl Display for SnapshotSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotSide::Remote => f.write_str("remote"),
            SnapshotSide::Local => f.write_str("local")
        }
    }
}
