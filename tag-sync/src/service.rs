use crate::cache::TagCache;
use crate::config::TagSyncConfig;
use crate::error::{TagSyncError, TagSyncResult};
use crate::lock::RedisNamespaceGuard;
use crate::store::PgTagStore;
use crate::wechat::WeChatClient;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use reconcile::{
    LocalStore, NamespaceGuard, ReconcileOptions, ReconciliationPlan, ReconciliationResult,
    Reconciler, RemoteSource
};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use validator::Validate;

pub type TagReconciler = Reconciler<i32, String>;

/// Result of syncing one account.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AccountSync {
    Completed(ReconciliationResult),
    Failed { error: String, retryable: bool }
}

impl AccountSync {
    pub fn is_success(&self) -> bool {
        matches!(self, AccountSync::Completed(result) if result.is_success())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub accounts: BTreeMap<String, AccountSync>
}

impl SyncSummary {
    pub fn has_errors(&self) -> bool {
        self.accounts.values().any(|account| !account.is_success())
    }
}

/// Wires the WeChat client, the tag table and the namespace lock into a
/// reconciler, one namespace per configured `app_id`.
pub struct TagSyncService {
    config: TagSyncConfig,
    reconciler: TagReconciler
}

impl TagSyncService {
    pub async fn connect(config: TagSyncConfig) -> TagSyncResult<Self> {
        config.validate()?;

        let store = Arc::new(Self::connect_store(&config).await?);
        let client = Arc::new(WeChatClient::new(&config.wechat, &config.accounts)?);

        let guard: Option<Arc<dyn NamespaceGuard>> = match &config.redis_url {
            Some(url) => Some(Arc::new(
                RedisNamespaceGuard::connect(url, config.lock_probe()).await?
            )),
            None => {
                warn!("REDIS_URL not set, namespace lock is process-local");
                None
            }
        };

        Self::from_parts(config, client, store, guard)
    }

    /// Opens the tag table (and its cache) without contacting WeChat.
    pub async fn connect_store(config: &TagSyncConfig) -> TagSyncResult<PgTagStore> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;

        let cache = match &config.redis_url {
            Some(url) => Some(TagCache::connect(url, config.cache_ttl_seconds).await?),
            None => None
        };

        Ok(PgTagStore::new(pool, cache))
    }

    pub fn from_parts(
        config: TagSyncConfig,
        remote: Arc<dyn RemoteSource<i32, String>>,
        local: Arc<dyn LocalStore<i32, String>>,
        guard: Option<Arc<dyn NamespaceGuard>>
    ) -> TagSyncResult<Self> {
        let mut reconciler = Reconciler::new(config.reconcile.clone(), remote, local)?;
        if let Some(guard) = guard {
            reconciler = reconciler.with_guard(guard);
        }
        Ok(Self { config, reconciler })
    }

    pub fn config(&self) -> &TagSyncConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &TagReconciler {
        &self.reconciler
    }

    pub async fn sync(
        &self,
        app_id: &str,
        options: ReconcileOptions
    ) -> TagSyncResult<ReconciliationResult> {
        self.ensure_account(app_id)?;
        Ok(self.reconciler.reconcile_with(app_id, options).await?)
    }

    pub async fn plan(&self, app_id: &str) -> TagSyncResult<ReconciliationPlan<i32, String>> {
        self.ensure_account(app_id)?;
        Ok(self.reconciler.plan(app_id).await?)
    }

    /// Syncs every configured account concurrently. One account failing
    /// never stops the others.
    pub async fn sync_all(&self, options: ReconcileOptions) -> SyncSummary {
        let started_at = Utc::now();
        let app_ids = self.config.app_ids();
        info!(accounts = app_ids.len(), "Starting tag sync for all accounts");

        let results = join_all(app_ids.iter().map(|app_id| self.sync(app_id, options))).await;

        let accounts = app_ids
            .into_iter()
            .zip(results)
            .map(|(app_id, result)| {
                let outcome = match result {
                    Ok(result) => AccountSync::Completed(result),
                    Err(e) => {
                        error!(app_id = %app_id, error = %e, "Tag sync failed");
                        AccountSync::Failed {
                            retryable: e.is_retryable(),
                            error: e.to_string()
                        }
                    }
                };
                (app_id, outcome)
            })
            .collect();

        SyncSummary {
            started_at,
            completed_at: Utc::now(),
            accounts
        }
    }

    fn ensure_account(&self, app_id: &str) -> TagSyncResult<()> {
        match self.config.account(app_id) {
            Some(_) => Ok(()),
            None => Err(TagSyncError::UnknownAccount(app_id.to_string()))
        }
    }
}
