use crate::error::{TagSyncError, TagSyncResult};
use crate::service::{AccountSync, SyncSummary, TagSyncService};
use chrono::{DateTime, Utc};
use reconcile::{ReconcileOptions, ReconciliationResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

type LastResults = Arc<RwLock<HashMap<String, AccountSync>>>;

/// Periodically syncs every configured account and remembers the latest
/// outcome per account.
pub struct SyncScheduler {
    scheduler: JobScheduler,
    job_id: Uuid,
    sync_service: Arc<TagSyncService>,
    last_results: LastResults
}

impl SyncScheduler {
    pub async fn new(sync_service: Arc<TagSyncService>) -> TagSyncResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| TagSyncError::SchedulerError(e.to_string()))?;

        let last_results: LastResults = Arc::new(RwLock::new(HashMap::new()));
        let interval = sync_service.config().sync_interval();

        let service_clone = sync_service.clone();
        let results_clone = last_results.clone();

        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let service = service_clone.clone();
            let results = results_clone.clone();
            Box::pin(async move {
                info!("Starting scheduled tag sync");
                let summary = service.sync_all(ReconcileOptions::default()).await;
                if summary.has_errors() {
                    error!(
                        accounts = summary.accounts.len(),
                        "Scheduled tag sync finished with errors"
                    );
                } else {
                    info!(
                        accounts = summary.accounts.len(),
                        "Scheduled tag sync completed"
                    );
                }
                store_summary(&results, summary).await;
            })
        })
        .map_err(|e| TagSyncError::SchedulerError(e.to_string()))?;

        let job_id = scheduler
            .add(job)
            .await
            .map_err(|e| TagSyncError::SchedulerError(e.to_string()))?;

        Ok(Self {
            scheduler,
            job_id,
            sync_service,
            last_results
        })
    }

    pub async fn start(&self) -> TagSyncResult<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| TagSyncError::SchedulerError(e.to_string()))?;
        info!("Tag sync scheduler started");
        Ok(())
    }

    pub async fn stop(&mut self) -> TagSyncResult<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| TagSyncError::SchedulerError(e.to_string()))?;
        info!("Tag sync scheduler stopped");
        Ok(())
    }

    /// Syncs one account outside the schedule.
    pub async fn run_now(
        &self,
        app_id: &str,
        options: ReconcileOptions
    ) -> TagSyncResult<ReconciliationResult> {
        let result = self.sync_service.sync(app_id, options).await;

        let outcome = match &result {
            Ok(result) => AccountSync::Completed(result.clone()),
            Err(e) => AccountSync::Failed {
                error: e.to_string(),
                retryable: e.is_retryable()
            }
        };
        self.last_results
            .write()
            .await
            .insert(app_id.to_string(), outcome);

        result
    }

    pub async fn run_all(&self, options: ReconcileOptions) -> SyncSummary {
        let summary = self.sync_service.sync_all(options).await;
        store_summary(&self.last_results, summary.clone()).await;
        summary
    }

    /// When the next scheduled sync fires.
    pub async fn next_run(&mut self) -> TagSyncResult<Option<DateTime<Utc>>> {
        self.scheduler
            .next_tick_for_job(self.job_id)
            .await
            .map_err(|e| TagSyncError::SchedulerError(e.to_string()))
    }

    pub async fn last_result(&self, app_id: &str) -> Option<AccountSync> {
        self.last_results.read().await.get(app_id).cloned()
    }
}

async fn store_summary(results: &LastResults, summary: SyncSummary) {
    let mut guard = results.write().await;
    guard.extend(summary.accounts);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccountConfig, TagSyncConfig};
    use async_trait::async_trait;
    use reconcile::{AdapterError, MemoryStore, RemoteEntity, RemoteSource};

    struct StaticRemote;

    #[async_trait]
    impl RemoteSource<i32, String> for StaticRemote {
        async fn fetch_all(
            &self,
            namespace: &str
        ) -> Result<Vec<RemoteEntity<i32, String>>, AdapterError> {
            if namespace == "wx-down" {
                return Err("tag API unreachable".into());
            }
            Ok(vec![
                RemoteEntity::new(namespace, 1, "star".to_string()),
                RemoteEntity::new(namespace, 2, "vip".to_string()),
            ])
        }
    }

    fn account(app_id: &str) -> AccountConfig {
        AccountConfig {
            app_id: app_id.to_string(),
            app_secret: "secret".to_string()
        }
    }

    async fn scheduler(interval_seconds: u64, app_ids: &[&str]) -> SyncScheduler {
        let config = TagSyncConfig {
            database_url: "postgres://unused".to_string(),
            sync_interval_seconds: interval_seconds,
            accounts: app_ids.iter().map(|app_id| account(app_id)).collect(),
            ..TagSyncConfig::default()
        };
        let store: Arc<MemoryStore<i32, String>> = Arc::new(MemoryStore::new());
        let service =
            TagSyncService::from_parts(config, Arc::new(StaticRemote), store, None).unwrap();
        SyncScheduler::new(Arc::new(service)).await.unwrap()
    }

    #[tokio::test]
    async fn test_next_run_follows_long_interval() {
        let before = Utc::now();
        let mut scheduler = scheduler(7200, &["wx-a"]).await;

        let next = scheduler.next_run().await.unwrap().unwrap();
        let delay = next - before;

        assert!(delay >= chrono::Duration::seconds(7199));
        assert!(delay <= chrono::Duration::seconds(7260));
    }

    #[tokio::test]
    async fn test_next_run_keeps_uneven_interval() {
        let before = Utc::now();
        let mut scheduler = scheduler(90, &["wx-a"]).await;

        let next = scheduler.next_run().await.unwrap().unwrap();
        let delay = next - before;

        assert!(delay >= chrono::Duration::seconds(89));
        assert!(delay <= chrono::Duration::seconds(150));
    }

    #[tokio::test]
    async fn test_run_now_records_unknown_account_failure() {
        let scheduler = scheduler(300, &["wx-a"]).await;

        let result = scheduler
            .run_now("wx-unknown", ReconcileOptions::default())
            .await;
        assert!(matches!(result, Err(TagSyncError::UnknownAccount(_))));

        match scheduler.last_result("wx-unknown").await {
            Some(AccountSync::Failed { error, retryable }) => {
                assert!(error.contains("wx-unknown"));
                assert!(!retryable);
            }
            other => panic!("expected a recorded failure, got {:?}", other)
        }
        assert!(scheduler.last_result("wx-a").await.is_none());
    }

    #[tokio::test]
    async fn test_run_now_records_completed_result() {
        let scheduler = scheduler(300, &["wx-a"]).await;

        let result = scheduler
            .run_now("wx-a", ReconcileOptions::default())
            .await
            .unwrap();
        assert_eq!(result.created, 2);

        match scheduler.last_result("wx-a").await {
            Some(AccountSync::Completed(recorded)) => assert_eq!(recorded.created, 2),
            other => panic!("expected a completed result, got {:?}", other)
        }
    }

    #[tokio::test]
    async fn test_run_all_merges_per_account_results() {
        let scheduler = scheduler(300, &["wx-a", "wx-b", "wx-down"]).await;

        let summary = scheduler.run_all(ReconcileOptions::default()).await;
        assert_eq!(summary.accounts.len(), 3);
        assert!(summary.has_errors());

        assert!(scheduler.last_result("wx-a").await.unwrap().is_success());
        assert!(scheduler.last_result("wx-b").await.unwrap().is_success());
        assert!(matches!(
            scheduler.last_result("wx-down").await,
            Some(AccountSync::Failed { retryable: true, .. })
        ));

        let second = scheduler.run_all(ReconcileOptions::default()).await;
        match second.accounts.get("wx-a") {
            Some(AccountSync::Completed(result)) => {
                assert_eq!(result.created, 0);
                assert_eq!(result.planned.effective_changes(), 0);
            }
            other => panic!("expected a completed result, got {:?}", other)
        }
    }
}
