//! Batch-apply driver.
//!
//! Each action kind is applied independently: the first failing batch of a
//! kind abandons that kind's remaining batches, while the other kinds still
//! run. Nothing is rolled back; the next run converges whatever was left.

use crate::adapter::LocalStore;
use crate::error::{AdapterError, BatchApplyError};
use crate::model::{ActionKind, Attributes, ExternalKey, LocalRecord, RemoteEntity};
use crate::plan::{ReconciliationPlan, UpdatePair};
use crate::telemetry::Telemetry;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-kind bookkeeping.
///
/// `attempted` counts records handed to the store (including a failed
/// batch); `succeeded` counts records in committed batches only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionOutcome {
    pub planned: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub batches: usize,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<BatchApplyError>
}

impl ActionOutcome {
    fn planned(planned: usize) -> Self {
        Self {
            planned,
            ..Self::default()
        }
    }

    /// Records never sent because an earlier batch of the kind failed.
    pub fn abandoned(&self) -> usize {
        self.planned - self.attempted
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<BatchApplyError>,
    serializer: S
) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.serialize_some(&err.to_string()),
        None => serializer.serialize_none()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub create: ActionOutcome,
    pub update: ActionOutcome,
    pub delete: ActionOutcome
}

impl ApplyReport {
    pub fn outcome(&self, kind: ActionKind) -> &ActionOutcome {
        match kind {
            ActionKind::Create => &self.create,
            ActionKind::Update => &self.update,
            ActionKind::Delete => &self.delete
        }
    }

    /// First error of every kind that failed.
    pub fn errors(&self) -> HashMap<ActionKind, BatchApplyError> {
        ActionKind::ALL
            .iter()
            .filter_map(|kind| {
                self.outcome(*kind)
                    .error
                    .clone()
                    .map(|error| (*kind, error))
            })
            .collect()
    }
}

pub struct BatchApplier<'a, K, A> {
    store: &'a dyn LocalStore<K, A>,
    batch_size: usize,
    batch_timeout: Duration
}

impl<'a, K: ExternalKey, A: Attributes> BatchApplier<'a, K, A> {
    pub fn new(store: &'a dyn LocalStore<K, A>, batch_size: usize, batch_timeout: Duration) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            batch_timeout
        }
    }

    /// Applies creates, then deletes, then updates. The kinds touch
    /// disjoint keys, so a failure in one never blocks the others.
    pub async fn apply(&self, plan: &ReconciliationPlan<K, A>) -> ApplyReport {
        let create = self.apply_creates(&plan.namespace, &plan.to_create).await;
        let delete = self.apply_deletes(&plan.namespace, &plan.to_delete).await;
        let update = self.apply_updates(&plan.namespace, &plan.to_update).await;

        ApplyReport {
            create,
            update,
            delete
        }
    }

    async fn apply_creates(&self, namespace: &str, entities: &[RemoteEntity<K, A>]) -> ActionOutcome {
        let mut outcome = ActionOutcome::planned(entities.len());

        for (batch_index, chunk) in entities.chunks(self.batch_size).enumerate() {
            outcome.attempted += chunk.len();
            outcome.batches += 1;

            let result = self
                .timed(self.store.create_batch(chunk, self.batch_size))
                .await;

            match result {
                Ok(()) => {
                    outcome.succeeded += chunk.len();
                    Telemetry::record_actions(ActionKind::Create, chunk.len(), true);
                    debug!(namespace, batch = batch_index, size = chunk.len(), "Create batch committed");
                }
                Err(cause) => {
                    Telemetry::record_actions(ActionKind::Create, chunk.len(), false);
                    warn!(
                        namespace,
                        batch = batch_index,
                        error = %cause,
                        abandoned = entities.len() - outcome.attempted,
                        "Create batch failed, skipping remaining create batches"
                    );
                    outcome.error = Some(BatchApplyError::new(
                        ActionKind::Create,
                        batch_index,
                        outcome.succeeded,
                        cause
                    ));
                    break;
                }
            }
        }

        outcome
    }

    async fn apply_deletes(&self, namespace: &str, records: &[LocalRecord<K, A>]) -> ActionOutcome {
        let mut outcome = ActionOutcome::planned(records.len());

        for (batch_index, chunk) in records.chunks(self.batch_size).enumerate() {
            let ids: Vec<String> = chunk
                .iter()
                .map(|record| record.internal_id.clone())
                .collect();
            outcome.attempted += ids.len();
            outcome.batches += 1;

            match self
                .timed(self.store.delete_batch_by_internal_id(&ids))
                .await
            {
                Ok(()) => {
                    outcome.succeeded += ids.len();
                    Telemetry::record_actions(ActionKind::Delete, ids.len(), true);
                    debug!(namespace, batch = batch_index, size = ids.len(), "Delete batch committed");
                }
                Err(cause) => {
                    Telemetry::record_actions(ActionKind::Delete, ids.len(), false);
                    warn!(
                        namespace,
                        batch = batch_index,
                        error = %cause,
                        abandoned = records.len() - outcome.attempted,
                        "Delete batch failed, skipping remaining delete batches"
                    );
                    outcome.error = Some(BatchApplyError::new(
                        ActionKind::Delete,
                        batch_index,
                        outcome.succeeded,
                        cause
                    ));
                    break;
                }
            }
        }

        outcome
    }

    /// Updates go one record at a time: the store's update primitive needs
    /// the pre-image of each record.
    async fn apply_updates(&self, namespace: &str, pairs: &[UpdatePair<K, A>]) -> ActionOutcome {
        let mut outcome = ActionOutcome::planned(pairs.len());

        for (index, pair) in pairs.iter().enumerate() {
            let old = &pair.current;
            let new = old.with_attributes(pair.desired.attributes.clone(), Utc::now());
            outcome.attempted += 1;
            outcome.batches += 1;

            match self.timed(self.store.update_one(old, &new)).await {
                Ok(()) => {
                    outcome.succeeded += 1;
                    Telemetry::record_actions(ActionKind::Update, 1, true);
                    info!(
                        target: "reconcile::audit",
                        namespace,
                        internal_id = %old.internal_id,
                        external_key = %old.external_key,
                        old = ?old.attributes,
                        new = ?new.attributes,
                        "Record updated"
                    );
                }
                Err(cause) => {
                    Telemetry::record_actions(ActionKind::Update, 1, false);
                    warn!(
                        namespace,
                        internal_id = %old.internal_id,
                        error = %cause,
                        abandoned = pairs.len() - outcome.attempted,
                        "Update failed, skipping remaining updates"
                    );
                    outcome.error = Some(BatchApplyError::new(
                        ActionKind::Update,
                        index,
                        outcome.succeeded,
                        cause
                    ));
                    break;
                }
            }
        }

        outcome
    }

    async fn timed<F>(&self, call: F) -> Result<(), AdapterError>
    where
        F: Future<Output = Result<(), AdapterError>>
    {
        match tokio::time::timeout(self.batch_timeout, call).await {
            Ok(result) => result,
            Err(elapsed) => Err(Box::new(elapsed))
        }
    }
}
