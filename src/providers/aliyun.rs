//! Aliyun STS `AssumeRole` client.
//!
//! Exchanges the long-lived account keys for a short-lived
//! (access key, secret, security token) triple scoped to the configured role.
//! Requests use the RPC signature scheme (HMAC-SHA1 over the canonical query).

use crate::config::AliyunConfig;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Client;
use serde::Deserialize;
use sha1::Sha1;
use std::{collections::BTreeMap, time::Duration};
use thiserror::Error;
use tracing::debug;

type HmacSha1 = Hmac<Sha1>;

const STS_API_VERSION: &str = "2015-04-01";

/// RFC 3986 unreserved characters stay as-is, everything else is escaped.
const RPC_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Error)]
pub enum StsError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{code}: {message} (request id {request_id})")]
    Api {
        code: String,
        message: String,
        request_id: String,
    },
}

/// Temporary credentials returned by `AssumeRole`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StsCredentials {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub security_token: String,
    pub expiration: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResponse {
    credentials: StsCredentials,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct StsErrorResponse {
    code: String,
    message: String,
    request_id: String,
}

/// Remote credential exchange. Implemented by [`StsClient`]; tests plug in
/// their own.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn assume_role(&self, duration_secs: u64) -> Result<StsCredentials, StsError>;
}

pub struct StsClient {
    http: Client,
    endpoint: String,
    access_key_id: String,
    access_key_secret: String,
    role_arn: String,
    session_name: String,
}

impl StsClient {
    pub fn new(cfg: &AliyunConfig) -> Result<Self, StsError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            access_key_id: cfg.access_key_id.clone(),
            access_key_secret: cfg.access_key_secret.clone(),
            role_arn: cfg.role_arn_oss_wr.clone(),
            session_name: cfg.session_name.clone(),
        })
    }

    /// Build the signed query string for one `AssumeRole` call.
    fn signed_query(&self, duration_secs: u64, now: DateTime<Utc>, nonce: &str) -> String {
        let mut params = BTreeMap::new();
        params.insert("Action", "AssumeRole".to_string());
        params.insert("Version", STS_API_VERSION.to_string());
        params.insert("Format", "JSON".to_string());
        params.insert("AccessKeyId", self.access_key_id.clone());
        params.insert("SignatureMethod", "HMAC-SHA1".to_string());
        params.insert("SignatureVersion", "1.0".to_string());
        params.insert("SignatureNonce", nonce.to_string());
        params.insert("Timestamp", now.format("%Y-%m-%dT%H:%M:%SZ").to_string());
        params.insert("RoleArn", self.role_arn.clone());
        params.insert("RoleSessionName", self.session_name.clone());
        params.insert("DurationSeconds", duration_secs.to_string());

        let canonical = canonical_query(&params);
        let signature = sign(&self.access_key_secret, &string_to_sign("GET", &canonical));
        format!("{}&Signature={}", canonical, percent_encode(&signature))
    }
}

#[async_trait]
impl CredentialExchange for StsClient {
    async fn assume_role(&self, duration_secs: u64) -> Result<StsCredentials, StsError> {
        let nonce = uuid::Uuid::new_v4().to_string();
        let url = format!(
            "{}/?{}",
            self.endpoint,
            self.signed_query(duration_secs, Utc::now(), &nonce)
        );
        debug!("sts:AssumeRole role={} duration={}s", self.role_arn, duration_secs);

        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body: StsErrorResponse = response.json().await.unwrap_or_default();
            return Err(StsError::Api {
                code: if body.code.is_empty() {
                    status.to_string()
                } else {
                    body.code
                },
                message: body.message,
                request_id: body.request_id,
            });
        }

        let body: AssumeRoleResponse = response.json().await?;
        Ok(body.credentials)
    }
}

/// Percent-encode per the RPC signature rules (RFC 3986, space as `%20`).
pub fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, RPC_ENCODE).to_string()
}

/// Sorted `key=value` pairs joined with `&`, both sides encoded.
pub fn canonical_query(params: &BTreeMap<&str, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn string_to_sign(method: &str, canonical: &str) -> String {
    format!(
        "{}&{}&{}",
        method,
        percent_encode("/"),
        percent_encode(canonical)
    )
}

/// Base64 HMAC-SHA1 keyed with `secret&`.
pub fn sign(secret: &str, string_to_sign: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(format!("{}&", secret).as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn percent_encoding_follows_rfc3986() {
        assert_eq!(percent_encode("a b*c~d/e"), "a%20b%2Ac~d%2Fe");
        assert_eq!(percent_encode("2016-02-23T12:46:24Z"), "2016-02-23T12%3A46%3A24Z");
    }

    #[test]
    fn signs_documented_example() {
        let mut params = BTreeMap::new();
        params.insert("Timestamp", "2016-02-23T12:46:24Z".to_string());
        params.insert("Format", "XML".to_string());
        params.insert("AccessKeyId", "testid".to_string());
        params.insert("Action", "DescribeRegions".to_string());
        params.insert("SignatureMethod", "HMAC-SHA1".to_string());
        params.insert(
            "SignatureNonce",
            "3ee8c1b8-83d3-44af-a94f-4e0ad82fd6cf".to_string(),
        );
        params.insert("Version", "2014-05-26".to_string());
        params.insert("SignatureVersion", "1.0".to_string());

        let to_sign = string_to_sign("GET", &canonical_query(&params));
        assert_eq!(
            to_sign,
            "GET&%2F&AccessKeyId%3Dtestid%26Action%3DDescribeRegions%26Format%3DXML\
             %26SignatureMethod%3DHMAC-SHA1%26SignatureNonce%3D3ee8c1b8-83d3-44af-a94f-4e0ad82fd6cf\
             %26SignatureVersion%3D1.0%26Timestamp%3D2016-02-23T12%253A46%253A24Z%26Version%3D2014-05-26"
        );
        assert_eq!(sign("testsecret", &to_sign), "OLeaidS1JvxuMvnyHOwuJ+uX5qY=");
    }

    #[test]
    fn assume_role_query_is_signed() {
        let cfg = AliyunConfig {
            access_key_id: "id".into(),
            access_key_secret: "secret".into(),
            role_arn_oss_wr: "acs:ram::1:role/writer".into(),
            session_name: "stash".into(),
            ..Default::default()
        };
        let client = StsClient::new(&cfg).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let query = client.signed_query(900, now, "nonce-1");

        let (canonical, signature) = query.split_once("&Signature=").unwrap();
        assert!(canonical.contains("Action=AssumeRole"));
        assert!(canonical.contains("DurationSeconds=900"));
        assert!(canonical.contains("RoleArn=acs%3Aram%3A%3A1%3Arole%2Fwriter"));
        assert!(canonical.contains("Timestamp=2024-01-02T03%3A04%3A05Z"));
        assert_eq!(
            signature,
            percent_encode(&sign("secret", &string_to_sign("GET", canonical)))
        );
    }

    #[test]
    fn decodes_credentials_payload() {
        let body = r#"{
            "RequestId": "6894B13B-6D71-4EF5-88FA-F32781734A7F",
            "AssumedRoleUser": {"Arn": "acs:ram::1:role/writer/stash", "AssumedRoleId": "3"},
            "Credentials": {
                "SecurityToken": "CAES+wMIARKAAZhjH0",
                "AccessKeySecret": "wyLTSmsyPGP1ohvvw8xYgB29dlGI8KMiH2pK",
                "AccessKeyId": "STS.L4aBSCSJVMuKg5U1",
                "Expiration": "2015-04-09T11:52:19Z"
            }
        }"#;
        let parsed: AssumeRoleResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.credentials.access_key_id, "STS.L4aBSCSJVMuKg5U1");
        assert_eq!(
            parsed.credentials.expiration,
            Utc.with_ymd_and_hms(2015, 4, 9, 11, 52, 19).unwrap()
        );
    }
}
