//! Defines routes for the object API, the OSS callback and health probes.
//!
//! ## Structure
//! - **Object endpoints** (`/v1/oss`)
//!   - `GET  /v1/oss/upload/token` - qiniu upload token for a category
//!   - `GET  /v1/oss/secrets` - temporary cloud credentials
//!   - `GET  /v1/oss/download/url` - signed private download URL
//!   - `GET  /v1/oss/get/{id}` - one object
//!   - `GET  /v1/oss/all` - every object, soft-deleted included
//!   - `POST /v1/oss/addref` - record an object and reference it
//!   - `POST /v1/oss/delref` - drop a reference
//!   - `POST /v1/oss/del` - soft-delete an object
//!
//! - **Callback**
//!   - `POST /callback/oss-put-object` - upload notification from aliyun OSS

use crate::{
    config::AppConfig,
    errors::{AppError, ErrorCode},
    handlers::{
        AppState,
        callback_handlers::oss_put_object,
        health_handlers::{healthz, readyz},
        object_handlers::{
            add_object_reference, delete_object, get_access_secrets, get_all_objects, get_object,
            get_private_url, get_upload_token, remove_object_reference,
        },
    },
};
use axum::{
    Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Build the router for every endpoint. The router carries `AppState` to all
/// handlers; call `.with_state` (or use [`app`]) to finish it.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Object routes
        .route("/v1/oss/upload/token", get(get_upload_token))
        .route("/v1/oss/secrets", get(get_access_secrets))
        .route("/v1/oss/download/url", get(get_private_url))
        .route("/v1/oss/get/{id}", get(get_object))
        .route("/v1/oss/all", get(get_all_objects))
        .route("/v1/oss/addref", post(add_object_reference))
        .route("/v1/oss/delref", post(remove_object_reference))
        .route("/v1/oss/del", post(delete_object))
        // Callback routes
        .route("/callback/oss-put-object", post(oss_put_object))
}

/// The finished application: routes, state, request timeout and, in debug
/// mode, request tracing.
pub fn app(state: AppState, cfg: &AppConfig) -> Router {
    let timeout = Duration::from_secs(cfg.server.request_timeout_secs.max(1));
    let router = routes()
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .layer(middleware::map_response(timeout_envelope));

    if cfg.debug {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Give timed-out requests the usual status envelope instead of an empty body.
async fn timeout_envelope(response: Response) -> Response {
    if response.status() != StatusCode::REQUEST_TIMEOUT {
        return response;
    }
    AppError::new(ErrorCode::Unknown, "request timed out")
        .with_status(StatusCode::REQUEST_TIMEOUT)
        .into_response()
}
