//! # Tag Sync
//!
//! Mirrors the user-tag catalog of WeChat official accounts into the
//! `wx_gzh_tag` table. Each `app_id` is one reconciliation namespace; the
//! engine itself lives in the `reconcile` crate.

pub mod cache;
pub mod config;
pub mod error;
pub mod lock;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod wechat;

pub use config::{AccountConfig, TagSyncConfig, WeChatConfig};
pub use error::{TagSyncError, TagSyncResult};
pub use lock::RedisNamespaceGuard;
pub use scheduler::SyncScheduler;
pub use service::{AccountSync, SyncSummary, TagReconciler, TagSyncService};
pub use store::{PgTagStore, TagRecord};
pub use wechat::{WeChatClient, WeChatTag};
