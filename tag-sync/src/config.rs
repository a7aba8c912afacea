use crate::error::{TagSyncError, TagSyncResult};
use reconcile::ReconcileConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

pub const DEFAULT_WECHAT_BASE_URL: &str = "https://api.weixin.qq.com";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TagSyncConfig {
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Enables the tag cache and the cross-process namespace lock.
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default = "default_cache_ttl")]
    #[validate(range(min = 1))]
    pub cache_ttl_seconds: u64,

    #[serde(default = "default_sync_interval")]
    #[validate(range(min = 60))]
    pub sync_interval_seconds: u64,

    /// How long a `reject` run probes the Redis lock before giving up.
    #[serde(default = "default_lock_probe")]
    pub lock_probe_ms: u64,

    #[serde(default)]
    #[validate(nested)]
    pub wechat: WeChatConfig,

    #[serde(default)]
    #[validate(nested)]
    pub accounts: Vec<AccountConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub reconcile: ReconcileConfig
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WeChatConfig {
    #[serde(default = "default_base_url")]
    #[validate(length(min = 1))]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1))]
    pub request_timeout_seconds: u64
}

/// Credentials of one official account. `app_id` doubles as the namespace.
#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct AccountConfig {
    #[validate(length(min = 1))]
    pub app_id: String,

    #[validate(length(min = 1))]
    pub app_secret: String
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_sync_interval() -> u64 {
    300
}

fn default_lock_probe() -> u64 {
    1000
}

fn default_base_url() -> String {
    DEFAULT_WECHAT_BASE_URL.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for WeChatConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_seconds: default_request_timeout()
        }
    }
}

impl Default for TagSyncConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            redis_url: None,
            cache_ttl_seconds: default_cache_ttl(),
            sync_interval_seconds: default_sync_interval(),
            lock_probe_ms: default_lock_probe(),
            wechat: WeChatConfig::default(),
            accounts: Vec::new(),
            reconcile: ReconcileConfig::default()
        }
    }
}

impl TagSyncConfig {
    /// Loads a TOML file and validates it.
    pub fn from_file(path: impl AsRef<Path>) -> TagSyncResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TagSyncError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TagSyncError::ConfigError(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from `DATABASE_URL`, `REDIS_URL`,
    /// `WX_ACCOUNTS` (`appid:secret,appid:secret`) and `TAG_SYNC_*`.
    pub fn from_env() -> TagSyncResult<Self> {
        let defaults = Self::default();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| TagSyncError::ConfigError("DATABASE_URL is not set".to_string()))?;

        let accounts = match std::env::var("WX_ACCOUNTS") {
            Ok(raw) => parse_accounts(&raw)?,
            Err(_) => Vec::new()
        };

        let mut reconcile = defaults.reconcile.clone();
        reconcile.batch_size = env_parse("TAG_SYNC_BATCH_SIZE").unwrap_or(reconcile.batch_size);
        reconcile.empty_remote_guard.max_wipe = env_parse("TAG_SYNC_MAX_WIPE")
            .unwrap_or(reconcile.empty_remote_guard.max_wipe);
        if let Some(wait_ms) = env_parse::<u64>("TAG_SYNC_LOCK_WAIT_MS") {
            reconcile.concurrency = reconcile::ConcurrencyPolicy::Wait {
                timeout_ms: wait_ms
            };
        }

        let config = Self {
            database_url,
            redis_url: std::env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            cache_ttl_seconds: env_parse("TAG_SYNC_CACHE_TTL_SECONDS")
                .unwrap_or(defaults.cache_ttl_seconds),
            sync_interval_seconds: env_parse("TAG_SYNC_INTERVAL_SECONDS")
                .unwrap_or(defaults.sync_interval_seconds),
            lock_probe_ms: env_parse("TAG_SYNC_LOCK_PROBE_MS").unwrap_or(defaults.lock_probe_ms),
            wechat: WeChatConfig {
                base_url: std::env::var("TAG_SYNC_WECHAT_BASE_URL")
                    .unwrap_or(defaults.wechat.base_url),
                request_timeout_seconds: env_parse("TAG_SYNC_REQUEST_TIMEOUT_SECONDS")
                    .unwrap_or(defaults.wechat.request_timeout_seconds)
            },
            accounts,
            reconcile
        };

        config.validate()?;
        Ok(config)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_seconds)
    }

    pub fn lock_probe(&self) -> Duration {
        Duration::from_millis(self.lock_probe_ms)
    }

    pub fn account(&self, app_id: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|account| account.app_id == app_id)
    }

    pub fn app_ids(&self) -> Vec<String> {
        self.accounts
            .iter()
            .map(|account| account.app_id.clone())
            .collect()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn parse_accounts(raw: &str) -> TagSyncResult<Vec<AccountConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((app_id, app_secret)) => Ok(AccountConfig {
                app_id: app_id.trim().to_string(),
                app_secret: app_secret.trim().to_string()
            }),
            None => Err(TagSyncError::ConfigError(format!(
                "WX_ACCOUNTS entry '{}' is not appid:secret",
                entry
            )))
        })
        .collect()
}
