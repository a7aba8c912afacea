use crate::adapter::{LocalStore, RemoteSource};
use crate::apply::{ApplyReport, BatchApplier};
use crate::config::{ReconcileConfig, ReconcileOptions};
use crate::error::{BatchApplyError, ReconcileError, ReconcileResult};
use crate::guard::{LocalNamespaceGuard, NamespaceGuard, NamespaceLease};
use crate::model::{ActionKind, Attributes, ExternalKey, LocalRecord, RemoteEntity};
use crate::plan::{PlanSummary, ReconciliationPlan};
use crate::telemetry::{RunTimer, Telemetry};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use validator::Validate;

/// Lifecycle of one run: `Idle → Fetching → Diffing → Applying → Done`,
/// or `Failed` when the run aborts before touching the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Fetching,
    Diffing,
    Applying,
    Done,
    Failed
}

/// Outcome of a run that reached the apply phase (or a dry run).
///
/// A non-empty `errors` map means some action kinds stopped early; whether
/// that fails the overall sync is the caller's decision.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    pub namespace: String,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    #[serde(serialize_with = "serialize_errors")]
    pub errors: HashMap<ActionKind, BatchApplyError>,
    pub planned: PlanSummary,
    pub report: ApplyReport,
    pub phase: RunPhase,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>
}

impl ReconciliationResult {
    fn from_report(
        namespace: &str,
        planned: PlanSummary,
        report: ApplyReport,
        started_at: DateTime<Utc>
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            created: report.create.succeeded,
            updated: report.update.succeeded,
            deleted: report.delete.succeeded,
            errors: report.errors(),
            planned,
            report,
            phase: RunPhase::Done,
            dry_run: false,
            started_at,
            completed_at: Utc::now()
        }
    }

    fn dry_run(namespace: &str, planned: PlanSummary, started_at: DateTime<Utc>) -> Self {
        Self {
            namespace: namespace.to_string(),
            created: 0,
            updated: 0,
            deleted: 0,
            errors: HashMap::new(),
            planned,
            report: ApplyReport::default(),
            phase: RunPhase::Done,
            dry_run: true,
            started_at,
            completed_at: Utc::now()
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&self, kind: ActionKind) -> Option<&BatchApplyError> {
        self.errors.get(&kind)
    }
}

fn serialize_errors<S: Serializer>(
    errors: &HashMap<ActionKind, BatchApplyError>,
    serializer: S
) -> Result<S::Ok, S::Error> {
    let rendered: BTreeMap<ActionKind, String> = errors
        .iter()
        .map(|(kind, error)| (*kind, error.to_string()))
        .collect();
    rendered.serialize(serializer)
}

/// Converges the local mirror of a namespace onto the remote snapshot.
pub struct Reconciler<K, A> {
    config: ReconcileConfig,
    remote: Arc<dyn RemoteSource<K, A>>,
    local: Arc<dyn LocalStore<K, A>>,
    guard: Arc<dyn NamespaceGuard>,
    phases: DashMap<String, RunPhase>
}

/// Publishes the current phase of a run and clears it when the run ends,
/// including when the run future is dropped mid-flight.
struct PhaseTracker<'a> {
    phases: &'a DashMap<String, RunPhase>,
    namespace: String
}

impl<'a> PhaseTracker<'a> {
    fn new(phases: &'a DashMap<String, RunPhase>, namespace: &str) -> Self {
        phases.insert(namespace.to_string(), RunPhase::Idle);
        Self {
            phases,
            namespace: namespace.to_string()
        }
    }

    fn set(&self, phase: RunPhase) {
        self.phases.insert(self.namespace.clone(), phase);
        debug!(namespace = %self.namespace, phase = ?phase, "Reconciliation phase");
    }
}

impl Drop for PhaseTracker<'_> {
    fn drop(&mut self) {
        self.phases.remove(&self.namespace);
    }
}

impl<K: ExternalKey, A: Attributes> Reconciler<K, A> {
    pub fn new(
        config: ReconcileConfig,
        remote: Arc<dyn RemoteSource<K, A>>,
        local: Arc<dyn LocalStore<K, A>>
    ) -> ReconcileResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            remote,
            local,
            guard: Arc::new(LocalNamespaceGuard::new()),
            phases: DashMap::new()
        })
    }

    /// Replaces the default in-process guard, e.g. with a distributed lock
    /// when several processes reconcile the same namespaces.
    pub fn with_guard(mut self, guard: Arc<dyn NamespaceGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Phase of the run currently holding `namespace`, `Idle` if none.
    pub fn phase(&self, namespace: &str) -> RunPhase {
        self.phases
            .get(namespace)
            .map(|phase| *phase)
            .unwrap_or(RunPhase::Idle)
    }

    pub async fn reconcile(&self, namespace: &str) -> ReconcileResult<ReconciliationResult> {
        self.reconcile_with(namespace, ReconcileOptions::default())
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn reconcile_with(
        &self,
        namespace: &str,
        options: ReconcileOptions
    ) -> ReconcileResult<ReconciliationResult> {
        let timer = RunTimer::start();
        let lease = self.acquire(namespace).await?;

        let result = {
            let tracker = PhaseTracker::new(&self.phases, namespace);
            self.run(namespace, options, &tracker).await
        };

        self.release(namespace, lease).await;
        timer.finish();

        match &result {
            Ok(outcome) if outcome.is_success() => {
                Telemetry::record_run("done");
                info!(
                    created = outcome.created,
                    updated = outcome.updated,
                    deleted = outcome.deleted,
                    dry_run = outcome.dry_run,
                    "Reconciliation completed"
                );
            }
            Ok(outcome) => {
                Telemetry::record_run("partial");
                warn!(
                    created = outcome.created,
                    updated = outcome.updated,
                    deleted = outcome.deleted,
                    failed_kinds = outcome.errors.len(),
                    "Reconciliation completed with apply errors"
                );
            }
            Err(e) => {
                Telemetry::record_run("failed");
                warn!(error = %e, "Reconciliation failed before any mutation");
            }
        }

        result
    }

    /// Computes the plan a run would apply right now, without applying it.
    ///
    /// Holds the namespace guard while reading so the preview is not taken
    /// halfway through another run.
    #[tracing::instrument(skip(self))]
    pub async fn plan(&self, namespace: &str) -> ReconcileResult<ReconciliationPlan<K, A>> {
        let lease = self.acquire(namespace).await?;

        let result = async {
            let (remote, local) = self.fetch_snapshots(namespace).await?;
            ReconciliationPlan::build(namespace, remote, local)
        }
        .await;

        self.release(namespace, lease).await;
        result
    }

    async fn run(
        &self,
        namespace: &str,
        options: ReconcileOptions,
        tracker: &PhaseTracker<'_>
    ) -> ReconcileResult<ReconciliationResult> {
        let started_at = Utc::now();

        tracker.set(RunPhase::Fetching);
        let (remote, local) = match self.fetch_snapshots(namespace).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                tracker.set(RunPhase::Failed);
                return Err(e);
            }
        };

        tracker.set(RunPhase::Diffing);
        let local_count = local.len();
        let plan = match ReconciliationPlan::build(namespace, remote, local)
            .and_then(|plan| self.check_empty_remote(plan, local_count, options))
        {
            Ok(plan) => plan,
            Err(e) => {
                tracker.set(RunPhase::Failed);
                return Err(e);
            }
        };

        let planned = plan.summary();
        info!(
            create = planned.create,
            update = planned.update,
            delete = planned.delete,
            unchanged = planned.unchanged,
            "Reconciliation plan computed"
        );

        if options.dry_run {
            tracker.set(RunPhase::Done);
            return Ok(ReconciliationResult::dry_run(namespace, planned, started_at));
        }

        tracker.set(RunPhase::Applying);
        let applier = BatchApplier::new(
            self.local.as_ref(),
            self.config.batch_size,
            self.config.batch_timeout()
        );
        let report = applier.apply(&plan).await;

        tracker.set(RunPhase::Done);
        Ok(ReconciliationResult::from_report(
            namespace, planned, report, started_at
        ))
    }

    /// Reads both sides concurrently; diffing waits for both.
    async fn fetch_snapshots(
        &self,
        namespace: &str
    ) -> ReconcileResult<(Vec<RemoteEntity<K, A>>, Vec<LocalRecord<K, A>>)> {
        let timeout = self.config.fetch_timeout();

        let (remote, local) = tokio::join!(
            tokio::time::timeout(timeout, self.remote.fetch_all(namespace)),
            tokio::time::timeout(timeout, self.local.fetch_all_by_namespace(namespace))
        );

        let remote = match remote {
            Ok(Ok(entities)) => entities,
            Ok(Err(source)) => {
                return Err(ReconcileError::RemoteFetch {
                    namespace: namespace.to_string(),
                    source
                });
            }
            Err(elapsed) => {
                return Err(ReconcileError::RemoteFetch {
                    namespace: namespace.to_string(),
                    source: Box::new(elapsed)
                });
            }
        };

        let local = match local {
            Ok(Ok(records)) => records,
            Ok(Err(source)) => {
                return Err(ReconcileError::LocalFetch {
                    namespace: namespace.to_string(),
                    source
                });
            }
            Err(elapsed) => {
                return Err(ReconcileError::LocalFetch {
                    namespace: namespace.to_string(),
                    source: Box::new(elapsed)
                });
            }
        };

        info!(
            remote = remote.len(),
            local = local.len(),
            "Fetched snapshots"
        );
        Ok((remote, local))
    }

    fn check_empty_remote(
        &self,
        plan: ReconciliationPlan<K, A>,
        local_count: usize,
        options: ReconcileOptions
    ) -> ReconcileResult<ReconciliationPlan<K, A>> {
        let guard = &self.config.empty_remote_guard;

        if guard.enabled
            && !options.allow_full_wipe
            && plan.is_full_wipe()
            && local_count > guard.max_wipe
        {
            return Err(ReconcileError::EmptyRemoteGuard {
                namespace: plan.namespace.clone(),
                local_count,
                max_wipe: guard.max_wipe
            });
        }

        Ok(plan)
    }

    async fn acquire(&self, namespace: &str) -> ReconcileResult<Box<dyn NamespaceLease>> {
        let wait = self.config.concurrency.wait_timeout();

        match self.guard.acquire(namespace, wait).await {
            Ok(Some(lease)) => Ok(lease),
            Ok(None) => {
                Telemetry::record_guard_rejection();
                info!(namespace, "Namespace already being reconciled, rejecting run");
                Err(ReconcileError::NamespaceBusy {
                    namespace: namespace.to_string()
                })
            }
            Err(e) => Err(ReconcileError::Guard {
                namespace: namespace.to_string(),
                reason: e.to_string()
            })
        }
    }

    async fn release(&self, namespace: &str, lease: Box<dyn NamespaceLease>) {
        if let Err(e) = lease.release().await {
            warn!(namespace, error = %e, "Failed to release namespace guard");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::memory::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct StaticRemote {
        entities: Vec<RemoteEntity<i32, String>>,
        delay: Option<Duration>
    }

    #[async_trait]
    impl RemoteSource<i32, String> for StaticRemote {
        async fn fetch_all(
            &self,
            _namespace: &str
        ) -> Result<Vec<RemoteEntity<i32, String>>, AdapterError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.entities.clone())
        }
    }

    fn remote(entries: &[(i32, &str)]) -> Arc<StaticRemote> {
        Arc::new(StaticRemote {
            entities: entries
                .iter()
                .map(|(key, name)| RemoteEntity::new("wx-app", *key, name.to_string()))
                .collect(),
            delay: None
        })
    }

    #[tokio::test]
    async fn test_reconcile_converges() {
        let store: Arc<MemoryStore<i32, String>> = Arc::new(MemoryStore::new());
        let reconciler: Reconciler<i32, String> = Reconciler::new(
            ReconcileConfig::default(),
            remote(&[(1, "A"), (2, "B")]),
            store.clone()
        )
        .unwrap();

        let result = reconciler.reconcile("wx-app").await.unwrap();

        assert_eq!(result.created, 2);
        assert_eq!(result.phase, RunPhase::Done);
        assert!(result.is_success());
        assert_eq!(store.snapshot("wx-app").await.len(), 2);
        assert_eq!(reconciler.phase("wx-app"), RunPhase::Idle);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_mutate() {
        let store: Arc<MemoryStore<i32, String>> = Arc::new(MemoryStore::new());
        let reconciler: Reconciler<i32, String> =
            Reconciler::new(ReconcileConfig::default(), remote(&[(1, "A")]), store.clone())
                .unwrap();

        let result = reconciler
            .reconcile_with(
                "wx-app",
                ReconcileOptions {
                    dry_run: true,
                    ..ReconcileOptions::default()
                }
            )
            .await
            .unwrap();

        assert!(result.dry_run);
        assert_eq!(result.planned.create, 1);
        assert_eq!(result.created, 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_remote_timeout_is_fetch_error() {
        let config = ReconcileConfig {
            fetch_timeout_ms: 20,
            ..ReconcileConfig::default()
        };
        let slow = Arc::new(StaticRemote {
            entities: vec![],
            delay: Some(Duration::from_millis(500))
        });
        let reconciler: Reconciler<i32, String> =
            Reconciler::new(config, slow, Arc::new(MemoryStore::<i32, String>::new())).unwrap();

        let err = reconciler.reconcile("wx-app").await.unwrap_err();
        assert!(matches!(err, ReconcileError::RemoteFetch { .. }));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = ReconcileConfig {
            batch_size: 0,
            ..ReconcileConfig::default()
        };
        let result: ReconcileResult<Reconciler<i32, String>> =
            Reconciler::new(config, remote(&[]), Arc::new(MemoryStore::<i32, String>::new()));

        assert!(matches!(result, Err(ReconcileError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_phase_visible_while_running() {
        let slow = Arc::new(StaticRemote {
            entities: vec![RemoteEntity::new("wx-app", 1, "A".to_string())],
            delay: Some(Duration::from_millis(200))
        });
        let reconciler: Arc<Reconciler<i32, String>> = Arc::new(
            Reconciler::new(
                ReconcileConfig::default(),
                slow,
                Arc::new(MemoryStore::<i32, String>::new())
            )
            .unwrap()
        );

        let handle = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.reconcile("wx-app").await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(reconciler.phase("wx-app"), RunPhase::Fetching);

        handle.await.unwrap().unwrap();
        assert_eq!(reconciler.phase("wx-app"), RunPhase::Idle);
    }

    #[test]
    fn test_result_serialization() {
        let mut report = ApplyReport::default();
        report.delete.error = Some(BatchApplyError::new(
            ActionKind::Delete,
            0,
            0,
            "store offline".into()
        ));

        let result =
            ReconciliationResult::from_report("wx-app", PlanSummary::default(), report, Utc::now());
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["phase"], "done");
        assert_eq!(
            json["errors"]["delete"],
            "delete batch 0 failed after 0 committed records: store offline"
        );
        assert!(!result.is_success());
    }
}
