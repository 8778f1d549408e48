//! Cloud provider adapters.
//!
//! - [`qiniu`]: upload-policy tokens and private download URLs, signed locally.
//! - [`aliyun`]: temporary credentials through STS `AssumeRole`.

pub mod aliyun;
pub mod qiniu;

use crate::errors::{AppError, ErrorCode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{fmt, str::FromStr};

/// Cloud services the API knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudService {
    Qiniu,
    Aliyun,
}

impl CloudService {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudService::Qiniu => "qiniu",
            CloudService::Aliyun => "aliyun",
        }
    }
}

impl fmt::Display for CloudService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudService {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qiniu" => Ok(CloudService::Qiniu),
            "aliyun" => Ok(CloudService::Aliyun),
            other => Err(AppError::new(
                ErrorCode::UnsupportedCloudService,
                format!("{} is not supported", other),
            )),
        }
    }
}

/// A signed upload token.
#[derive(Debug, Clone, Serialize)]
pub struct UploadToken {
    pub bucket: String,
    pub token: String,
    pub expiration: DateTime<Utc>,
}

/// Short-lived credentials handed to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessSecrets {
    pub cloud_service: String,
    pub access_key_id: String,
    pub access_key_secret: String,
    pub token: String,
    pub expiration: DateTime<Utc>,
}

/// A time-limited download URL.
#[derive(Debug, Clone, Serialize)]
pub struct PrivateUrl {
    pub url: String,
    pub expiration: DateTime<Utc>,
}
