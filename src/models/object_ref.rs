//! Represents a user's tagged reference to an object (`oss_ref` table).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Links a user to an [`Object`](super::object::Object) under a purpose tag
/// such as `avatar`. Unique per `(user_id, object_id, tag)`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectRef {
    pub id: i64,
    pub user_id: i64,
    pub object_id: i64,
    pub tag: String,
    pub status: i32,
    pub created_time: DateTime<Utc>,
}
