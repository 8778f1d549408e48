pub mod callback_handlers;
pub mod health_handlers;
pub mod object_handlers;

use crate::{
    errors::{AppError, AppResult, ErrorCode},
    repository::ObjectRepository,
    services::{callback_service::CallbackService, object_service::ObjectService},
};
use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, Request, rejection::PathRejection},
    http::request::Parts,
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub objects: ObjectService,
    pub callbacks: CallbackService,
    /// Used directly by the readiness probe.
    pub repo: Arc<dyn ObjectRepository>,
}

/// JSON request body whose decode failures are reported as `invalid body`
/// inside the usual status envelope.
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|err| AppError::wrap(ErrorCode::InvalidBody, "read body", err))?;
        serde_json::from_slice(&body)
            .map(JsonBody)
            .map_err(|err| AppError::wrap(ErrorCode::InvalidBody, "decode body", err))
    }
}

/// Query string extractor; malformed query strings are reported as
/// `invalid parameter` inside the status envelope.
pub struct QueryParams<T>(pub T);

impl<T, S> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(QueryParams(value)),
            Err(err) => Err(AppError::invalid_parameter(err.body_text())),
        }
    }
}

/// Path parameter extractor; undecodable segments are `invalid parameter`,
/// anything else axum reports is an `unknown error`.
pub struct PathParam<T>(pub T);

impl<T, S> FromRequestParts<S> for PathParam<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(PathParam(value)),
            Err(PathRejection::FailedToDeserializePathParams(err)) => {
                Err(AppError::invalid_parameter(err.body_text()))
            }
            Err(err) => Err(AppError::new(ErrorCode::Unknown, err.body_text())),
        }
    }
}

/// A query parameter that must be present and non-empty.
pub(crate) fn required(name: &str, value: Option<String>) -> AppResult<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::invalid_parameter(format!("empty {}", name))),
    }
}
