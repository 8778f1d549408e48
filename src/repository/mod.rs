//! Persistence accessors for objects and object references.
//!
//! Services talk to the database only through [`ObjectRepository`]; the SQLite
//! implementation lives in [`sqlite`].

pub mod sqlite;

use crate::models::{
    object::{NewObject, Object},
    object_ref::ObjectRef,
};
use async_trait::async_trait;
use thiserror::Error;

pub use sqlite::SqliteObjectRepository;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique index rejected the write.
    #[error("duplicate entry: {0}")]
    Duplicate(String),
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Typed create / find / soft-delete operations over `oss` and `oss_ref`.
#[async_trait]
pub trait ObjectRepository: Send + Sync {
    /// Insert a new object and return its id.
    /// Fails with [`StoreError::Duplicate`] when `(cloud, bucket, key)` exists.
    async fn create_object(&self, obj: &NewObject) -> StoreResult<i64>;

    async fn find_object(&self, id: i64) -> StoreResult<Object>;

    async fn find_object_id(&self, cloud: &str, bucket: &str, key: &str) -> StoreResult<i64>;

    /// All objects ordered by id, soft-deleted ones included.
    async fn find_all_objects(&self) -> StoreResult<Vec<Object>>;

    async fn soft_delete_object(&self, id: i64) -> StoreResult<()>;

    /// Insert a reference, or reset an existing one back to normal.
    async fn store_object_ref(
        &self,
        user_id: i64,
        object_id: i64,
        tag: &str,
    ) -> StoreResult<ObjectRef>;

    async fn soft_delete_object_ref(
        &self,
        user_id: i64,
        object_id: i64,
        tag: &str,
    ) -> StoreResult<()>;

    /// Cheap connectivity check used by the readiness probe.
    async fn ping(&self) -> StoreResult<()>;
}

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
