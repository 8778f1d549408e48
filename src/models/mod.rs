//! Data models for uploaded objects and user references to them.
//!
//! They map to the `oss` and `oss_ref` tables via `sqlx::FromRow` and
//! serialize as JSON via `serde`.

pub mod object;
pub mod object_ref;
