//! Webhook endpoint called by aliyun OSS once an upload is stored.
//! Unlike `/v1/oss`, failures here are reported with HTTP 400 so OSS sees
//! the callback as rejected.

use super::{AppState, JsonBody};
use crate::{
    errors::{AppError, AppResult, Envelope},
    services::callback_service::{CallbackResult, OssCallbackParam},
};
use axum::{Json, extract::State, http::StatusCode};

/// POST `/callback/oss-put-object`
pub async fn oss_put_object(
    State(state): State<AppState>,
    body: Result<JsonBody<OssCallbackParam>, AppError>,
) -> AppResult<Json<Envelope<CallbackResult>>> {
    let JsonBody(param) = body.map_err(|err| err.with_status(StatusCode::BAD_REQUEST))?;

    let result = state
        .callbacks
        .oss_put_object_callback(param)
        .await
        .map_err(|err| err.with_status(StatusCode::BAD_REQUEST))?;
    Ok(Envelope::ok(result))
}
