//! # Reconcile
//!
//! Converges a locally cached entity set onto an authoritative remote
//! snapshot, namespace by namespace.
//!
//! A run fetches both snapshots, computes a [`ReconciliationPlan`]
//! (creates, updates, deletes keyed by external key) and applies it through
//! the [`LocalStore`] in bounded batches. Fetch-phase problems abort the run
//! before any write; apply-phase problems are isolated per action kind and
//! reported in the [`ReconciliationResult`].

pub mod adapter;
pub mod apply;
pub mod config;
pub mod error;
pub mod guard;
pub mod memory;
pub mod model;
pub mod plan;
pub mod reconciler;
pub mod telemetry;

mod proptests;

pub use adapter::{LocalStore, RemoteSource};
pub use apply::{ActionOutcome, ApplyReport, BatchApplier};
pub use config::{ConcurrencyPolicy, EmptyRemoteGuardConfig, ReconcileConfig, ReconcileOptions};
pub use error::{AdapterError, BatchApplyError, ReconcileError, ReconcileResult};
pub use guard::{LocalNamespaceGuard, NamespaceGuard, NamespaceLease};
pub use memory::MemoryStore;
pub use model::{ActionKind, Attributes, ExternalKey, LocalRecord, RemoteEntity, SnapshotSide};
pub use plan::{KeyDiff, PlanSummary, ReconciliationPlan, UpdatePair, diff_keys};
pub use reconciler::{ReconciliationResult, Reconciler, RunPhase};
