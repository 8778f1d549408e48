//! SQLite-backed [`ObjectRepository`].

use super::{ObjectRepository, StoreError, StoreResult, is_unique_violation};
use crate::models::{
    object::{NewObject, Object, STATUS_DELETED, STATUS_NORMAL},
    object_ref::ObjectRef,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

const OBJECT_COLUMNS: &str =
    r#"id, cloud, bucket, "key", etag, mime_type, size, status, created_time"#;
const OBJECT_REF_COLUMNS: &str = "id, user_id, object_id, tag, status, created_time";

#[derive(Clone)]
pub struct SqliteObjectRepository {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteObjectRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ObjectRepository for SqliteObjectRepository {
    async fn create_object(&self, obj: &NewObject) -> StoreResult<i64> {
        let result = sqlx::query(
            r#"INSERT INTO oss (cloud, bucket, "key", etag, mime_type, size, status, created_time)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&obj.cloud)
        .bind(&obj.bucket)
        .bind(&obj.key)
        .bind(&obj.etag)
        .bind(&obj.mime_type)
        .bind(obj.size)
        .bind(STATUS_NORMAL)
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Duplicate(format!(
                "{}/{}/{}",
                obj.cloud, obj.bucket, obj.key
            ))),
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    async fn find_object(&self, id: i64) -> StoreResult<Object> {
        sqlx::query_as::<_, Object>(&format!(
            "SELECT {} FROM oss WHERE id = ?",
            OBJECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn find_object_id(&self, cloud: &str, bucket: &str, key: &str) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT id FROM oss WHERE cloud = ? AND bucket = ? AND "key" = ?"#,
        )
        .bind(cloud)
        .bind(bucket)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn find_all_objects(&self) -> StoreResult<Vec<Object>> {
        let rows = sqlx::query_as::<_, Object>(&format!(
            "SELECT {} FROM oss ORDER BY id ASC",
            OBJECT_COLUMNS
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    async fn soft_delete_object(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("UPDATE oss SET status = ? WHERE id = ?")
            .bind(STATUS_DELETED)
            .bind(id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        debug!("soft-deleted object {}", id);
        Ok(())
    }

    async fn store_object_ref(
        &self,
        user_id: i64,
        object_id: i64,
        tag: &str,
    ) -> StoreResult<ObjectRef> {
        let inserted = sqlx::query_as::<_, ObjectRef>(&format!(
            "INSERT INTO oss_ref (user_id, object_id, tag, status, created_time)
             VALUES (?, ?, ?, ?, ?)
             RETURNING {}",
            OBJECT_REF_COLUMNS
        ))
        .bind(user_id)
        .bind(object_id)
        .bind(tag)
        .bind(STATUS_NORMAL)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match inserted {
            Ok(object_ref) => Ok(object_ref),
            Err(err) if is_unique_violation(&err) => {
                debug!(
                    "reference ({}, {}, {}) exists, restoring status",
                    user_id, object_id, tag
                );
                let restored = sqlx::query_as::<_, ObjectRef>(&format!(
                    "UPDATE oss_ref SET status = ?
                     WHERE user_id = ? AND object_id = ? AND tag = ?
                     RETURNING {}",
                    OBJECT_REF_COLUMNS
                ))
                .bind(STATUS_NORMAL)
                .bind(user_id)
                .bind(object_id)
                .bind(tag)
                .fetch_one(&*self.db)
                .await?;
                Ok(restored)
            }
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    async fn soft_delete_object_ref(
        &self,
        user_id: i64,
        object_id: i64,
        tag: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE oss_ref SET status = ? WHERE user_id = ? AND object_id = ? AND tag = ?",
        )
        .bind(STATUS_DELETED)
        .bind(user_id)
        .bind(object_id)
        .bind(tag)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}
