//! Wire-level status envelope shared by every endpoint.
//!
//! Responses look like `{"data": ..., "status": {"code": "...", "msg": "..."}}`.
//! `code` is `"0"` on success and otherwise one of [`ErrorCode`].

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::fmt;

/// Closed set of error codes exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unimplemented,
    MissingParameter,
    InvalidParameter,
    InvalidBody,
    UnsupportedCloudService,
    AlreadyExists,
    NotFound,
    UpdateFailed,
    AliyunSts,
    ModelOperation,
    ModelFunctionFailed,
    UserVerificationFailed,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::MissingParameter => "missing parameter",
            ErrorCode::InvalidParameter => "invalid parameter",
            ErrorCode::InvalidBody => "invalid body",
            ErrorCode::UnsupportedCloudService => "unsupported cloud service",
            ErrorCode::AlreadyExists => "already exists",
            ErrorCode::NotFound => "not found",
            ErrorCode::UpdateFailed => "update failed",
            ErrorCode::AliyunSts => "aliyun STS error",
            ErrorCode::ModelOperation => "model operation error",
            ErrorCode::ModelFunctionFailed => "model function failed",
            ErrorCode::UserVerificationFailed => "user verification failed",
            ErrorCode::Unknown => "unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `status` member of every response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub code: String,
    pub msg: String,
}

impl Status {
    pub fn success() -> Self {
        Self {
            code: "0".into(),
            msg: String::new(),
        }
    }
}

/// Successful response body. `data` is left out for operations that
/// return nothing.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub status: Status,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            data: Some(data),
            status: Status::success(),
        })
    }
}

impl Envelope<()> {
    pub fn empty() -> Json<Self> {
        Json(Self {
            data: None,
            status: Status::success(),
        })
    }
}

/// Application error: a stable code, a free-text message and the HTTP status
/// used when it is rendered.
#[derive(Debug)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    pub status: StatusCode,
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Errors render with HTTP 200 unless overridden with [`AppError::with_status`];
    /// clients read the outcome from the body.
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            status: StatusCode::OK,
        }
    }

    /// Wrap an underlying error, prefixing the operation that failed.
    pub fn wrap(code: ErrorCode, op: &str, err: impl fmt::Display) -> Self {
        Self::new(code, format!("{}: {}", op, err))
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParameter, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, msg)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn to_status(&self) -> Status {
        Status {
            code: self.code.as_str().into(),
            msg: self.message.clone(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::debug!(code = self.code.as_str(), "request failed: {}", self.message);
        let body = Json(json!({ "status": self.to_status() }));
        (self.status, body).into_response()
    }
}
