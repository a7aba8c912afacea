//! Postgres `wx_gzh_tag` table with an optional Redis cache in front.

use crate::cache::{TagCache, namespace_key, record_key};
use crate::error::{TagSyncError, TagSyncResult};
use async_trait::async_trait;
use chrono::Utc;
use reconcile::{AdapterError, LocalRecord, LocalStore, RemoteEntity};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

pub type TagRecord = LocalRecord<i32, String>;

pub struct PgTagStore {
    pool: PgPool,
    cache: Option<TagCache>
}

impl PgTagStore {
    pub fn new(pool: PgPool, cache: Option<TagCache>) -> Self {
        Self { pool, cache }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> TagSyncResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wx_gzh_tag (
                id TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                tag_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ
            )"
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_wx_gzh_tag_app_tag
             ON wx_gzh_tag(app_id, tag_id) WHERE deleted_at IS NULL"
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_wx_gzh_tag_app_id ON wx_gzh_tag(app_id)")
            .execute(&self.pool)
            .await?;

        info!("wx_gzh_tag schema ready");
        Ok(())
    }

    /// Live tags of one account, sorted by WeChat tag ID.
    pub async fn find_by_app_id(&self, app_id: &str) -> TagSyncResult<Vec<TagRecord>> {
        let key = namespace_key(app_id);
        if let Some(cache) = &self.cache {
            if let Some(records) = cache.get::<Vec<TagRecord>>(&key).await {
                return Ok(records);
            }
        }

        let rows = sqlx::query(
            "SELECT id, app_id, tag_id, name, created_at, updated_at FROM wx_gzh_tag
             WHERE app_id = $1 AND deleted_at IS NULL ORDER BY tag_id"
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;
        let records: Vec<TagRecord> = rows.iter().map(record_from_row).collect();

        if let Some(cache) = &self.cache {
            cache.put(&key, &records).await;
        }
        Ok(records)
    }

    pub async fn find_by_id(&self, id: &str) -> TagSyncResult<Option<TagRecord>> {
        let key = record_key(id);
        if let Some(cache) = &self.cache {
            if let Some(record) = cache.get::<TagRecord>(&key).await {
                return Ok(Some(record));
            }
        }

        let row = sqlx::query(
            "SELECT id, app_id, tag_id, name, created_at, updated_at FROM wx_gzh_tag
             WHERE id = $1 AND deleted_at IS NULL"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let record = row.as_ref().map(record_from_row);

        if let (Some(cache), Some(record)) = (&self.cache, &record) {
            cache.put(&key, record).await;
        }
        Ok(record)
    }

    /// Inserts all `tags` in one transaction, `batch_size` rows per statement.
    pub async fn create(
        &self,
        tags: &[RemoteEntity<i32, String>],
        batch_size: usize
    ) -> TagSyncResult<()> {
        if tags.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for chunk in tags.chunks(batch_size.max(1)) {
            let ids: Vec<String> = chunk.iter().map(|_| Uuid::new_v4().to_string()).collect();
            let app_ids: Vec<String> = chunk.iter().map(|tag| tag.namespace.clone()).collect();
            let tag_ids: Vec<i32> = chunk.iter().map(|tag| tag.external_key).collect();
            let names: Vec<String> = chunk.iter().map(|tag| tag.attributes.clone()).collect();

            sqlx::query(
                "INSERT INTO wx_gzh_tag (id, app_id, tag_id, name, created_at, updated_at)
                 SELECT t.id, t.app_id, t.tag_id, t.name, $5, $5
                 FROM UNNEST($1::text[], $2::text[], $3::int4[], $4::text[])
                     AS t(id, app_id, tag_id, name)"
            )
            .bind(ids)
            .bind(app_ids)
            .bind(tag_ids)
            .bind(names)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let namespaces: BTreeSet<&str> = tags.iter().map(|tag| tag.namespace.as_str()).collect();
        debug!(count = tags.len(), "Created tags");
        self.invalidate(namespaces.into_iter().map(namespace_key).collect())
            .await
    }

    /// Soft-deletes the given rows.
    pub async fn soft_delete(&self, ids: &[String]) -> TagSyncResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let rows = sqlx::query(
            "UPDATE wx_gzh_tag SET deleted_at = NOW(), updated_at = NOW()
             WHERE id = ANY($1) AND deleted_at IS NULL
             RETURNING id, app_id"
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut keys: BTreeSet<String> = BTreeSet::new();
        for row in &rows {
            keys.insert(record_key(row.get::<&str, _>("id")));
            keys.insert(namespace_key(row.get::<&str, _>("app_id")));
        }
        self.invalidate(keys.into_iter().collect()).await?;

        Ok(rows.len() as u64)
    }

    /// Writes `new.attributes` over the row identified by `old`.
    pub async fn update(&self, old: &TagRecord, new: &TagRecord) -> TagSyncResult<()> {
        if old.internal_id != new.internal_id || old.external_key != new.external_key {
            return Err(TagSyncError::IdentityChange(old.internal_id.clone()));
        }

        let result = sqlx::query(
            "UPDATE wx_gzh_tag SET name = $2, updated_at = $3
             WHERE id = $1 AND deleted_at IS NULL"
        )
        .bind(&new.internal_id)
        .bind(&new.attributes)
        .bind(new.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TagSyncError::RecordNotFound(old.internal_id.clone()));
        }

        if old.attributes != new.attributes {
            info!(
                target: "tag_sync::audit",
                id = %new.internal_id,
                app_id = %new.namespace,
                tag_id = new.external_key,
                old_name = %old.attributes,
                new_name = %new.attributes,
                "Tag renamed"
            );
        }

        self.invalidate(vec![
            record_key(&new.internal_id),
            namespace_key(&old.namespace),
            namespace_key(&new.namespace),
        ])
        .await
    }

    async fn invalidate(&self, keys: Vec<String>) -> TagSyncResult<()> {
        match &self.cache {
            Some(cache) => cache.invalidate(&keys).await,
            None => Ok(())
        }
    }
}

fn record_from_row(row: &PgRow) -> TagRecord {
    LocalRecord {
        internal_id: row.get("id"),
        namespace: row.get("app_id"),
        external_key: row.get("tag_id"),
        attributes: row.get("name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at")
    }
}

#[async_trait]
impl LocalStore<i32, String> for PgTagStore {
    async fn fetch_all_by_namespace(&self, namespace: &str) -> Result<Vec<TagRecord>, AdapterError> {
        Ok(self.find_by_app_id(namespace).await?)
    }

    async fn create_batch(
        &self,
        records: &[RemoteEntity<i32, String>],
        batch_size: usize
    ) -> Result<(), AdapterError> {
        Ok(self.create(records, batch_size).await?)
    }

    async fn delete_batch_by_internal_id(&self, ids: &[String]) -> Result<(), AdapterError> {
        self.soft_delete(ids).await?;
        Ok(())
    }

    async fn update_one(&self, old: &TagRecord, new: &TagRecord) -> Result<(), AdapterError> {
        Ok(self.update(old, new).await?)
    }
}
