//! ObjectService: upload tokens, temporary credentials, download URLs and
//! the object/reference bookkeeping behind `/v1/oss`.
//!
//! Every public operation returns an [`AppError`] with a closed error code;
//! raw storage or provider errors never leave this module.

use crate::{
    errors::{AppError, AppResult, ErrorCode},
    models::object::{NewObject, ObjectInfo},
    providers::{
        AccessSecrets, CloudService, PrivateUrl, UploadToken, aliyun::CredentialExchange,
        qiniu::QiniuProvider,
    },
    repository::{ObjectRepository, StoreError},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ObjectService {
    repo: Arc<dyn ObjectRepository>,
    qiniu: Arc<QiniuProvider>,
    sts: Arc<dyn CredentialExchange>,
    /// Lifetime requested for STS credentials, in seconds.
    sts_duration: u64,
}

impl ObjectService {
    pub fn new(
        repo: Arc<dyn ObjectRepository>,
        qiniu: QiniuProvider,
        sts: Arc<dyn CredentialExchange>,
        sts_duration: u64,
    ) -> Self {
        Self {
            repo,
            qiniu: Arc::new(qiniu),
            sts,
            sts_duration,
        }
    }

    /// The category is checked first, so an unknown one is always an invalid
    /// parameter. Upload tokens are only issued for qiniu.
    pub fn get_upload_token(&self, cloud: &str, category: &str, user: &str) -> AppResult<UploadToken> {
        if !self.qiniu.has_category(category) {
            return Err(AppError::invalid_parameter(format!(
                "unknown category: {}",
                category
            )));
        }
        match cloud.parse::<CloudService>()? {
            CloudService::Qiniu => self.qiniu.upload_token(category, user),
            other => Err(AppError::new(
                ErrorCode::UnsupportedCloudService,
                format!("upload tokens are not issued for {}", other),
            )),
        }
    }

    pub async fn get_access_secrets(
        &self,
        cloud: &str,
        bucket: &str,
        options: &str,
    ) -> AppResult<AccessSecrets> {
        let cloud = cloud.parse::<CloudService>()?;
        let options = decode_options(options);
        debug!(
            "access secrets for {}/{} with {} option(s)",
            cloud,
            bucket,
            options.len()
        );

        match cloud {
            CloudService::Aliyun => {
                let creds = self
                    .sts
                    .assume_role(self.sts_duration)
                    .await
                    .map_err(|err| AppError::wrap(ErrorCode::AliyunSts, "sts:AssumeRole", err))?;
                Ok(AccessSecrets {
                    cloud_service: cloud.to_string(),
                    access_key_id: creds.access_key_id,
                    access_key_secret: creds.access_key_secret,
                    token: creds.security_token,
                    expiration: creds.expiration,
                })
            }
            CloudService::Qiniu => Ok(AccessSecrets {
                cloud_service: cloud.to_string(),
                access_key_id: String::new(),
                access_key_secret: String::new(),
                token: String::new(),
                expiration: Utc::now(),
            }),
        }
    }

    pub fn get_private_url(&self, cloud: &str, domain: &str, key: &str) -> AppResult<PrivateUrl> {
        match cloud.parse::<CloudService>()? {
            CloudService::Qiniu => Ok(self.qiniu.private_url(domain, key)),
            CloudService::Aliyun => Err(AppError::new(ErrorCode::Unimplemented, "GetPrivateURL")),
        }
    }

    /// Record `info` (if new) and attach it to `user_id` under `tag`.
    /// Repeating the call is harmless: existing rows are reused.
    pub async fn add_object_reference(
        &self,
        user_id: i64,
        tag: &str,
        info: &ObjectInfo,
    ) -> AppResult<()> {
        info.cloud.parse::<CloudService>()?;
        if info.bucket.is_empty() {
            return Err(AppError::invalid_parameter("empty bucket"));
        }
        if info.key.is_empty() {
            return Err(AppError::invalid_parameter("empty key"));
        }
        if tag.is_empty() {
            return Err(AppError::invalid_parameter("empty tag"));
        }

        match self.repo.create_object(&NewObject::from(info)).await {
            Ok(id) => info!("stored object {} ({}/{})", id, info.bucket, info.key),
            Err(StoreError::Duplicate(what)) => debug!("object {} already stored", what),
            Err(err) => return Err(AppError::wrap(ErrorCode::ModelOperation, "StoreObject", err)),
        }

        let object_id = self
            .repo
            .find_object_id(&info.cloud, &info.bucket, &info.key)
            .await
            .map_err(|err| AppError::wrap(ErrorCode::ModelOperation, "AddObjectReference", err))?;

        let object_ref = self
            .repo
            .store_object_ref(user_id, object_id, tag)
            .await
            .map_err(|err| AppError::wrap(ErrorCode::ModelOperation, "StoreObjectRef", err))?;
        debug!(
            "user {} references object {} as {} (ref {})",
            user_id, object_id, tag, object_ref.id
        );

        Ok(())
    }

    pub async fn remove_object_reference(
        &self,
        user_id: i64,
        object_id: i64,
        tag: &str,
    ) -> AppResult<()> {
        match self.repo.soft_delete_object_ref(user_id, object_id, tag).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => Err(AppError::not_found(format!(
                "no reference ({}, {}, {})",
                user_id, object_id, tag
            ))),
            Err(err) => Err(AppError::wrap(ErrorCode::ModelOperation, "DeleteObjectRef", err)),
        }
    }

    /// Soft-deleted objects are returned as well, with their deleted status.
    pub async fn get_object(&self, id: i64) -> AppResult<ObjectInfo> {
        match self.repo.find_object(id).await {
            Ok(obj) => Ok(obj.into()),
            Err(StoreError::NotFound) => Err(AppError::not_found(format!("FindObject: object {} not found", id))),
            Err(err) => Err(AppError::wrap(ErrorCode::ModelOperation, "FindObject", err)),
        }
    }

    pub async fn get_all_objects(&self) -> AppResult<Vec<ObjectInfo>> {
        let objects = self
            .repo
            .find_all_objects()
            .await
            .map_err(|err| AppError::wrap(ErrorCode::ModelOperation, "FindAllObjects", err))?;
        Ok(objects.into_iter().map(ObjectInfo::from).collect())
    }

    pub async fn delete_object(&self, id: i64) -> AppResult<()> {
        match self.repo.soft_delete_object(id).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => Err(AppError::not_found(format!("DeleteObject: object {} not found", id))),
            Err(err) => Err(AppError::wrap(ErrorCode::UpdateFailed, "DeleteObject", err)),
        }
    }
}

/// Decode the URL-safe base64 JSON options blob. Empty or malformed input
/// means no options; a bad blob is logged and otherwise ignored.
fn decode_options(raw: &str) -> Map<String, Value> {
    if raw.is_empty() {
        return Map::new();
    }
    let decoded = URL_SAFE
        .decode(raw)
        .map_err(|err| err.to_string())
        .and_then(|bytes| {
            serde_json::from_slice::<Map<String, Value>>(&bytes).map_err(|err| err.to_string())
        });
    match decoded {
        Ok(options) => options,
        Err(err) => {
            warn!("ignoring malformed options {:?}: {}", raw, err);
            Map::new()
        }
    }
}
