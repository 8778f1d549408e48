//! HTTP handlers for `/v1/oss`.
//! Decode the request, delegate to `ObjectService`, and wrap the result in
//! the status envelope. Errors, including malformed queries and paths, are
//! rendered by `AppError` with HTTP 200.

use super::{AppState, JsonBody, PathParam, QueryParams, required};
use crate::{
    errors::{AppError, AppResult, Envelope, ErrorCode},
    models::object::ObjectInfo,
    providers::{AccessSecrets, PrivateUrl, UploadToken},
};
use axum::{Json, extract::State, response::IntoResponse};
use serde::{Deserialize, Serialize};

/// Query params accepted by `GET /v1/oss/upload/token`.
#[derive(Debug, Deserialize)]
pub struct UploadTokenQuery {
    pub cloud: Option<String>,
    pub category: Option<String>,
    pub user: Option<String>,
}

/// Query params accepted by `GET /v1/oss/secrets`.
#[derive(Debug, Deserialize)]
pub struct AccessSecretsQuery {
    pub cloud: Option<String>,
    pub bucket: Option<String>,
    /// URL-safe base64 JSON object; may be omitted.
    pub options: Option<String>,
}

/// Query params accepted by `GET /v1/oss/download/url`.
#[derive(Debug, Deserialize)]
pub struct PrivateUrlQuery {
    pub cloud: Option<String>,
    pub domain: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddObjectReferenceReq {
    #[serde(rename = "userID", default)]
    pub user_id: i64,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub object: ObjectInfo,
}

#[derive(Debug, Deserialize)]
pub struct RemoveObjectReferenceReq {
    #[serde(rename = "userID", default)]
    pub user_id: i64,
    #[serde(rename = "objectID", default)]
    pub object_id: i64,
    #[serde(default)]
    pub tag: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteObjectReq {
    #[serde(default)]
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct SecretsData {
    pub secrets: AccessSecrets,
}

#[derive(Debug, Serialize)]
pub struct UrlData {
    pub url: PrivateUrl,
}

#[derive(Debug, Serialize)]
pub struct ObjectData {
    pub object: ObjectInfo,
}

#[derive(Debug, Serialize)]
pub struct ObjectsData {
    pub objects: Vec<ObjectInfo>,
}

/// GET `/v1/oss/upload/token?cloud=&category=&user=`
pub async fn get_upload_token(
    State(state): State<AppState>,
    QueryParams(q): QueryParams<UploadTokenQuery>,
) -> AppResult<Json<Envelope<UploadToken>>> {
    let cloud = required("cloud", q.cloud)?;
    let category = required("category", q.category)?;
    let user = required("user", q.user)?;

    let token = state.objects.get_upload_token(&cloud, &category, &user)?;
    Ok(Envelope::ok(token))
}

/// GET `/v1/oss/secrets?cloud=&bucket=&options=`
pub async fn get_access_secrets(
    State(state): State<AppState>,
    QueryParams(q): QueryParams<AccessSecretsQuery>,
) -> AppResult<Json<Envelope<SecretsData>>> {
    let cloud = required("cloud", q.cloud)?;
    let bucket = required("bucket", q.bucket)?;
    let options = q.options.unwrap_or_default();

    let secrets = state
        .objects
        .get_access_secrets(&cloud, &bucket, &options)
        .await?;
    Ok(Envelope::ok(SecretsData { secrets }))
}

/// GET `/v1/oss/download/url?cloud=&domain=&key=`
pub async fn get_private_url(
    State(state): State<AppState>,
    QueryParams(q): QueryParams<PrivateUrlQuery>,
) -> AppResult<Json<Envelope<UrlData>>> {
    let cloud = required("cloud", q.cloud)?;
    let domain = required("domain", q.domain)?;
    let key = required("key", q.key)?;

    let url = state.objects.get_private_url(&cloud, &domain, &key)?;
    Ok(Envelope::ok(UrlData { url }))
}

/// GET `/v1/oss/get/{id}`
pub async fn get_object(
    State(state): State<AppState>,
    PathParam(id): PathParam<String>,
) -> AppResult<Json<Envelope<ObjectData>>> {
    let id = parse_id(&id)?;
    let object = state.objects.get_object(id).await?;
    Ok(Envelope::ok(ObjectData { object }))
}

/// GET `/v1/oss/all`
pub async fn get_all_objects(
    State(state): State<AppState>,
) -> AppResult<Json<Envelope<ObjectsData>>> {
    let objects = state.objects.get_all_objects().await?;
    Ok(Envelope::ok(ObjectsData { objects }))
}

/// POST `/v1/oss/addref`
pub async fn add_object_reference(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<AddObjectReferenceReq>,
) -> AppResult<impl IntoResponse> {
    state
        .objects
        .add_object_reference(req.user_id, &req.tag, &req.object)
        .await?;
    Ok(Envelope::empty())
}

/// POST `/v1/oss/delref`
pub async fn remove_object_reference(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RemoveObjectReferenceReq>,
) -> AppResult<impl IntoResponse> {
    state
        .objects
        .remove_object_reference(req.user_id, req.object_id, &req.tag)
        .await?;
    Ok(Envelope::empty())
}

/// POST `/v1/oss/del`
pub async fn delete_object(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<DeleteObjectReq>,
) -> AppResult<impl IntoResponse> {
    state.objects.delete_object(req.id).await?;
    Ok(Envelope::empty())
}

/// Object ids are positive integers.
fn parse_id(raw: &str) -> AppResult<i64> {
    if raw.is_empty() {
        return Err(AppError::new(ErrorCode::MissingParameter, "missing id"));
    }
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(AppError::invalid_parameter("invalid id")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_ids_only() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert_eq!(parse_id("abc").unwrap_err().code, ErrorCode::InvalidParameter);
        assert_eq!(parse_id("-3").unwrap_err().code, ErrorCode::InvalidParameter);
        assert_eq!(parse_id("0").unwrap_err().code, ErrorCode::InvalidParameter);
        assert_eq!(parse_id("").unwrap_err().code, ErrorCode::MissingParameter);
    }

    #[test]
    fn addref_body_uses_wire_names() {
        let req: AddObjectReferenceReq = serde_json::from_str(
            r#"{"userID": 5, "tag": "avatar",
                "object": {"cloud": "qiniu", "bucket": "b", "key": "k", "mimeType": "image/png", "size": 9}}"#,
        )
        .unwrap();
        assert_eq!(req.user_id, 5);
        assert_eq!(req.object.mime_type, "image/png");
        assert_eq!(req.object.size, 9);
    }
}
