use crate::error::TagSyncResult;
use metrics::counter;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

pub fn namespace_key(app_id: &str) -> String {
    format!("wx_gzh_tag:app:{}", app_id)
}

pub fn record_key(id: &str) -> String {
    format!("wx_gzh_tag:id:{}", id)
}

/// Read-through JSON cache in front of the tag table.
///
/// Reads degrade to misses when Redis is unavailable. Invalidation errors
/// are returned, since a stale namespace entry would hide committed writes.
#[derive(Clone)]
pub struct TagCache {
    conn: ConnectionManager,
    ttl_seconds: u64
}

impl TagCache {
    pub async fn connect(redis_url: &str, ttl_seconds: u64) -> TagSyncResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn, ttl_seconds })
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = match conn.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                return None;
            }
        };

        match raw.map(|raw| serde_json::from_str(&raw)) {
            Some(Ok(value)) => {
                counter!("tag_sync_cache_hits_total").increment(1);
                Some(value)
            }
            Some(Err(e)) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
            None => {
                counter!("tag_sync_cache_misses_total").increment(1);
                None
            }
        }
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = conn.set_ex(key, raw, self.ttl_seconds).await;
        if let Err(e) = result {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    pub async fn invalidate(&self, keys: &[String]) -> TagSyncResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = conn.del(keys).await?;
        Ok(())
    }
}
