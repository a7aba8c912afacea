use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Engine settings shared by every namespace a [`crate::Reconciler`] serves.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReconcileConfig {
    /// Maximum records per create/delete batch call.
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 1000))]
    pub batch_size: usize,
    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1))]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1))]
    pub batch_timeout_ms: u64,
    #[serde(default)]
    pub empty_remote_guard: EmptyRemoteGuardConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyPolicy
}

/// Refuses to wipe a namespace when the remote suddenly reports nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmptyRemoteGuardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Largest local record count an empty remote snapshot may delete
    /// without explicit confirmation.
    #[serde(default)]
    pub max_wipe: usize
}

/// What a second run for an in-flight namespace does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// Fail immediately with `NamespaceBusy`.
    #[default]
    Reject,
    /// Wait up to `timeout_ms` for the running reconciliation, then fail.
    Wait { timeout_ms: u64 }
}

impl ConcurrencyPolicy {
    pub fn wait_timeout(&self) -> Option<Duration> {
        match self {
            ConcurrencyPolicy::Reject => None,
            ConcurrencyPolicy::Wait { timeout_ms } => Some(Duration::from_millis(*timeout_ms))
        }
    }
}

/// Per-run switches supplied by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Compute and report the plan without touching the local store.
    #[serde(default)]
    pub dry_run: bool,
    /// Explicit confirmation that an empty remote snapshot really means
    /// "delete everything" for this run.
    #[serde(default)]
    pub allow_full_wipe: bool
}

fn default_batch_size() -> usize {
    100
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Default for EmptyRemoteGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_wipe: 0
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            fetch_timeout_ms: default_timeout_ms(),
            batch_timeout_ms: default_timeout_ms(),
            empty_remote_guard: EmptyRemoteGuardConfig::default(),
            concurrency: ConcurrencyPolicy::default()
        }
    }
}

impl ReconcileConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReconcileConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
        assert!(config.empty_remote_guard.enabled);
        assert_eq!(config.empty_remote_guard.max_wipe, 0);
        assert_eq!(config.concurrency, ConcurrencyPolicy::Reject);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = ReconcileConfig {
            batch_size: 0,
            ..ReconcileConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ReconcileConfig = serde_json::from_str(
            r#"{"batch_size": 50, "concurrency": {"mode": "wait", "timeout_ms": 2000}}"#
        )
        .unwrap();

        assert_eq!(config.batch_size, 50);
        assert_eq!(config.batch_timeout_ms, 30_000);
        assert!(config.empty_remote_guard.enabled);
        assert_eq!(
            config.concurrency.wait_timeout(),
            Some(Duration::from_secs(2))
        );
    }
}
