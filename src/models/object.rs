//! Represents an uploaded object recorded in the `oss` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Row status for a live record.
pub const STATUS_NORMAL: i32 = 0;
/// Row status after a soft delete.
pub const STATUS_DELETED: i32 = -1;

/// A single object previously uploaded to a cloud bucket.
///
/// `(cloud, bucket, key)` is unique. Rows are never removed; deleting an
/// object flips `status` to [`STATUS_DELETED`].
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Autoincrement primary key.
    pub id: i64,

    /// Cloud provider name (`qiniu`, `aliyun`).
    pub cloud: String,

    pub bucket: String,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Content hash reported by the provider.
    pub etag: String,

    pub mime_type: String,

    /// Size in bytes.
    pub size: i64,

    pub status: i32,

    pub created_time: DateTime<Utc>,
}

/// Values needed to insert a new `oss` row.
#[derive(Clone, Debug)]
pub struct NewObject {
    pub cloud: String,
    pub bucket: String,
    pub key: String,
    pub etag: String,
    pub mime_type: String,
    pub size: i64,
}

/// Client-facing projection of an [`Object`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ObjectInfo {
    pub cloud: String,
    pub bucket: String,
    pub key: String,
    pub etag: String,
    pub mime_type: String,
    pub size: i64,
    pub status: i32,
}

impl From<Object> for ObjectInfo {
    fn from(obj: Object) -> Self {
        Self {
            cloud: obj.cloud,
            bucket: obj.bucket,
            key: obj.key,
            etag: obj.etag,
            mime_type: obj.mime_type,
            size: obj.size,
            status: obj.status,
        }
    }
}

impl From<&ObjectInfo> for NewObject {
    fn from(info: &ObjectInfo) -> Self {
        Self {
            cloud: info.cloud.clone(),
            bucket: info.bucket.clone(),
            key: info.key.clone(),
            etag: info.etag.clone(),
            mime_type: info.mime_type.clone(),
            size: info.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_info_uses_camel_case_and_defaults() {
        let info: ObjectInfo =
            serde_json::from_str(r#"{"cloud":"qiniu","bucket":"b","key":"k","mimeType":"image/png"}"#)
                .unwrap();
        assert_eq!(info.mime_type, "image/png");
        assert_eq!(info.size, 0);
        assert_eq!(info.status, STATUS_NORMAL);

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["mimeType"], "image/png");
        assert!(value.get("mime_type").is_none());
    }
}
