//! services/sync_agent/src/adapters/db.rs
//!
//! This module contains the SQLite adapter, the durable implementation of the
//! `LocalStore` port from the `core` crate. Records are stored as JSON bodies next
//! to the columns the store needs to index on.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use lesson_sync_core::domain::{OfflineLesson, PendingTemplate, StoreCounts, SyncAction, SyncQueueItem};
use lesson_sync_core::ports::{LocalStore, PortError, PortResult};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, info};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A SQLite-backed store that implements the `LocalStore` port.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Creates a new `SqliteStore` over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database at `url` and applies migrations.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self::new(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    /// An in-memory database. A single connection keeps every query on the same database.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Local store migrations applied.");
        Ok(())
    }
}

fn storage_err(e: sqlx::Error) -> PortError {
    PortError::StorageUnavailable(e.to_string())
}

fn serde_err(e: serde_json::Error) -> PortError {
    PortError::Serialization(e.to_string())
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct LessonRecord {
    body: String,
}
impl LessonRecord {
    fn to_domain(self) -> PortResult<OfflineLesson> {
        serde_json::from_str(&self.body).map_err(serde_err)
    }
}

#[derive(FromRow)]
struct QueueRecord {
    id: String,
    lesson_id: String,
    action: String,
    data: Option<String>,
    timestamp: String,
    retry_count: i64,
}
impl QueueRecord {
    fn to_domain(self) -> PortResult<SyncQueueItem> {
        let action = SyncAction::from_str(&self.action).map_err(PortError::Serialization)?;
        let data = self
            .data
            .map(|raw| serde_json::from_str::<OfflineLesson>(&raw))
            .transpose()
            .map_err(serde_err)?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| PortError::Serialization(e.to_string()))?
            .with_timezone(&Utc);
        Ok(SyncQueueItem {
            id: self.id,
            lesson_id: self.lesson_id,
            action,
            data,
            timestamp,
            retry_count: self.retry_count.max(0) as u32,
        })
    }
}

#[derive(FromRow)]
struct TemplateRecord {
    body: String,
}
impl TemplateRecord {
    fn to_domain(self) -> PortResult<PendingTemplate> {
        serde_json::from_str(&self.body).map_err(serde_err)
    }
}

async fn upsert_lesson<'e, E>(executor: E, lesson: &OfflineLesson) -> PortResult<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let body = serde_json::to_string(lesson).map_err(serde_err)?;
    sqlx::query(
        "INSERT INTO lessons (id, user_id, updated_at, is_favorite, is_offline_created, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             user_id = excluded.user_id,
             updated_at = excluded.updated_at,
             is_favorite = excluded.is_favorite,
             is_offline_created = excluded.is_offline_created,
             body = excluded.body",
    )
    .bind(&lesson.id)
    .bind(&lesson.user_id)
    .bind(timestamp(&lesson.updated_at))
    .bind(lesson.is_favorite)
    .bind(lesson.is_offline_created)
    .bind(body)
    .execute(executor)
    .await
    .map_err(storage_err)?;
    Ok(())
}

//=========================================================================================
// `LocalStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl LocalStore for SqliteStore {
    async fn put_lesson(&self, lesson: &OfflineLesson) -> PortResult<()> {
        upsert_lesson(&self.pool, lesson).await?;
        debug!("Lesson saved: {}", lesson.id);
        Ok(())
    }

    async fn get_lesson(&self, lesson_id: &str) -> PortResult<Option<OfflineLesson>> {
        let record = sqlx::query_as::<_, LessonRecord>("SELECT body FROM lessons WHERE id = ?1")
            .bind(lesson_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        record.map(LessonRecord::to_domain).transpose()
    }

    async fn list_lessons(&self, user_id: &str) -> PortResult<Vec<OfflineLesson>> {
        let records = sqlx::query_as::<_, LessonRecord>(
            "SELECT body FROM lessons WHERE user_id = ?1 ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        records.into_iter().map(LessonRecord::to_domain).collect()
    }

    async fn list_favorite_lessons(&self, user_id: &str) -> PortResult<Vec<OfflineLesson>> {
        let records = sqlx::query_as::<_, LessonRecord>(
            "SELECT body FROM lessons WHERE user_id = ?1 AND is_favorite = 1 ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        records.into_iter().map(LessonRecord::to_domain).collect()
    }

    async fn delete_lesson(&self, lesson_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM lessons WHERE id = ?1")
            .bind(lesson_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn replace_user_lessons(
        &self,
        user_id: &str,
        lessons: &[OfflineLesson],
        keep: &[String],
    ) -> PortResult<()> {
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
        let incoming: HashSet<&str> = lessons.iter().map(|l| l.id.as_str()).collect();

        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let existing: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM lessons WHERE user_id = ?1 AND is_offline_created = 0",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(storage_err)?;

        for stale in existing
            .iter()
            .filter(|id| !incoming.contains(id.as_str()) && !keep.contains(id.as_str()))
        {
            sqlx::query("DELETE FROM lessons WHERE id = ?1")
                .bind(stale)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }

        for lesson in lessons.iter().filter(|l| !keep.contains(l.id.as_str())) {
            upsert_lesson(&mut *tx, lesson).await?;
        }

        tx.commit().await.map_err(storage_err)?;
        info!("Bulk saved {} lessons for user {}", lessons.len(), user_id);
        Ok(())
    }

    async fn replace_lesson(&self, old_id: &str, lesson: &OfflineLesson) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        sqlx::query("DELETE FROM lessons WHERE id = ?1")
            .bind(old_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        upsert_lesson(&mut *tx, lesson).await?;
        tx.commit().await.map_err(storage_err)?;
        debug!("Lesson {} replaced by {}", old_id, lesson.id);
        Ok(())
    }

    async fn enqueue(&self, item: &SyncQueueItem) -> PortResult<()> {
        let data = item
            .data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(serde_err)?;
        sqlx::query(
            "INSERT INTO sync_queue (id, lesson_id, action, data, timestamp, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&item.id)
        .bind(&item.lesson_id)
        .bind(item.action.as_str())
        .bind(data)
        .bind(timestamp(&item.timestamp))
        .bind(i64::from(item.retry_count))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        debug!("Added to sync queue: {} {}", item.action, item.lesson_id);
        Ok(())
    }

    async fn list_queue(&self) -> PortResult<Vec<SyncQueueItem>> {
        let records = sqlx::query_as::<_, QueueRecord>(
            "SELECT id, lesson_id, action, data, timestamp, retry_count FROM sync_queue ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        records.into_iter().map(QueueRecord::to_domain).collect()
    }

    async fn get_queue_item(&self, item_id: &str) -> PortResult<Option<SyncQueueItem>> {
        let record = sqlx::query_as::<_, QueueRecord>(
            "SELECT id, lesson_id, action, data, timestamp, retry_count FROM sync_queue WHERE id = ?1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        record.map(QueueRecord::to_domain).transpose()
    }

    async fn update_queue_item(&self, item: &SyncQueueItem) -> PortResult<()> {
        let data = item
            .data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(serde_err)?;
        sqlx::query(
            "UPDATE sync_queue SET lesson_id = ?1, action = ?2, data = ?3, retry_count = ?4 WHERE id = ?5",
        )
        .bind(&item.lesson_id)
        .bind(item.action.as_str())
        .bind(data)
        .bind(i64::from(item.retry_count))
        .bind(&item.id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn remove_queue_item(&self, item_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn remap_queue_lesson_id(&self, old_id: &str, new_id: &str) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let rows: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT id, data FROM sync_queue WHERE lesson_id = ?1")
                .bind(old_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(storage_err)?;

        for (item_id, data) in rows {
            let data = match data {
                Some(raw) => {
                    let mut lesson: OfflineLesson = serde_json::from_str(&raw).map_err(serde_err)?;
                    lesson.id = new_id.to_string();
                    lesson.is_offline_created = false;
                    Some(serde_json::to_string(&lesson).map_err(serde_err)?)
                }
                None => None,
            };
            sqlx::query("UPDATE sync_queue SET lesson_id = ?1, data = ?2 WHERE id = ?3")
                .bind(new_id)
                .bind(data)
                .bind(&item_id)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn queued_lesson_ids(&self) -> PortResult<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT lesson_id FROM sync_queue")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)
    }

    async fn queue_len(&self) -> PortResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(count.max(0) as usize)
    }

    async fn put_user_data(&self, key: &str, value: &Value) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO user_data (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value.to_string())
        .bind(timestamp(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_user_data(&self, key: &str) -> PortResult<Option<Value>> {
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM user_data WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        raw.map(|r| serde_json::from_str(&r))
            .transpose()
            .map_err(serde_err)
    }

    async fn save_pending_template(&self, template: &PendingTemplate) -> PortResult<()> {
        let body = serde_json::to_string(template).map_err(serde_err)?;
        sqlx::query(
            "INSERT INTO pending_templates (id, user_id, saved_at, body) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET user_id = excluded.user_id, saved_at = excluded.saved_at, body = excluded.body",
        )
        .bind(&template.id)
        .bind(&template.user_id)
        .bind(timestamp(&template.saved_at))
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        debug!("Saved pending template: {}", template.template_title);
        Ok(())
    }

    async fn list_pending_templates(&self, user_id: &str) -> PortResult<Vec<PendingTemplate>> {
        let records = sqlx::query_as::<_, TemplateRecord>(
            "SELECT body FROM pending_templates WHERE user_id = ?1 ORDER BY saved_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        records.into_iter().map(TemplateRecord::to_domain).collect()
    }

    async fn remove_pending_template(&self, template_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM pending_templates WHERE id = ?1")
            .bind(template_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn counts(&self) -> PortResult<StoreCounts> {
        let (lessons, sync_queue, pending_templates): (i64, i64, i64) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM lessons), (SELECT COUNT(*) FROM sync_queue), (SELECT COUNT(*) FROM pending_templates)",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(StoreCounts {
            lessons: lessons.max(0) as usize,
            sync_queue: sync_queue.max(0) as usize,
            pending_templates: pending_templates.max(0) as usize,
        })
    }

    async fn clear_all(&self) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for table in ["lessons", "sync_queue", "user_data", "pending_templates"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;
        info!("All offline data cleared");
        Ok(())
    }
}
