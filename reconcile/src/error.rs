use crate::model::{ActionKind, SnapshotSide};
use std::sync::Arc;
use thiserror::Error;

/// Error type returned across the adapter seams.
pub type AdapterError = Box<dyn std::error::Error + Send + Sync>;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors that abort a reconciliation run before any local mutation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Remote fetch failed for namespace {namespace}: {source}")]
    RemoteFetch {
        namespace: String,
        #[source]
        source: AdapterError
    },

    #[error("Local fetch failed for namespace {namespace}: {source}")]
    LocalFetch {
        namespace: String,
        #[source]
        source: AdapterError
    },

    #[error("Duplicate external key {key} in {side} snapshot of namespace {namespace}")]
    DuplicateExternalKey {
        namespace: String,
        key: String,
        side: SnapshotSide
    },

    #[error(
        "Remote snapshot for namespace {namespace} is empty but {local_count} local records exist \
         (full wipe allowed up to {max_wipe})"
    )]
    EmptyRemoteGuard {
        namespace: String,
        local_count: usize,
        max_wipe: usize
    },

    #[error("Namespace {namespace} is already being reconciled")]
    NamespaceBusy { namespace: String },

    #[error("Namespace guard failed for {namespace}: {reason}")]
    Guard { namespace: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String)
}

impl ReconcileError {
    /// Fetch-phase and guard errors leave the store untouched, so the caller
    /// may simply re-invoke the run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteFetch { .. } | Self::LocalFetch { .. } | Self::NamespaceBusy { .. }
        )
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::RemoteFetch { namespace, .. }
            | Self::LocalFetch { namespace, .. }
            | Self::DuplicateExternalKey { namespace, .. }
            | Self::EmptyRemoteGuard { namespace, .. }
            | Self::NamespaceBusy { namespace }
            | Self::Guard { namespace, .. } => Some(namespace),
            Self::InvalidConfig(_) => None
        }
    }
}

impl From<validator::ValidationErrors> for ReconcileError {
    fn from(err: validator::ValidationErrors) -> Self {
        ReconcileError::InvalidConfig(err.to_string())
    }
}

/// First failure of one action kind during the apply phase.
///
/// Batches committed before `batch_index` stay applied; the remaining
/// batches of `kind` were never sent.
#[derive(Debug, Clone, Error)]
#[error("{kind} batch {batch_index} failed after {committed} committed records: {cause}")]
pub struct BatchApplyError {
    pub kind: ActionKind,
    pub batch_index: usize,
    pub committed: usize,
    #[source]
    pub cause: Arc<dyn std::error::Error + Send + Sync>
}

impl BatchApplyError {
    pub fn new(kind: ActionKind, batch_index: usize, committed: usize, cause: AdapterError) -> Self {
        Self {
            kind,
            batch_index,
            committed,
            cause: Arc::from(cause)
        }
    }
}
