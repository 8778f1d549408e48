//! Qiniu upload tokens and private download URLs.
//!
//! Both are signed locally with HMAC-SHA1 over the account secret key; no
//! network call is made.

use super::{PrivateUrl, UploadToken};
use crate::{
    config::{QiniuCategory, QiniuConfig},
    errors::{AppError, AppResult},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Used when a configured duration is zero.
const DEFAULT_TOKEN_DURATION: u64 = 3600;
/// Longest lifetime handed out for tokens and URLs: one year.
pub const MAX_TOKEN_DURATION: u64 = 365 * 24 * 3600;

/// Characters left unescaped in object keys placed in a URL path.
const KEY_PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Account credentials used for signing.
#[derive(Clone)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// `<access_key>:<urlsafe_b64(hmac_sha1(data))>`
    pub fn sign(&self, data: &[u8]) -> String {
        format!("{}:{}", self.access_key, self.digest(data))
    }

    /// `<access_key>:<urlsafe_b64(hmac_sha1(encoded))>:<encoded>` where
    /// `encoded` is the URL-safe base64 of `data`.
    pub fn sign_with_data(&self, data: &[u8]) -> String {
        let encoded = URL_SAFE.encode(data);
        format!(
            "{}:{}:{}",
            self.access_key,
            self.digest(encoded.as_bytes()),
            encoded
        )
    }

    fn digest(&self, data: &[u8]) -> String {
        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(data);
        URL_SAFE.encode(mac.finalize().into_bytes())
    }
}

/// Upload policy encoded into a token. Empty and zero fields are omitted.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PutPolicy {
    pub scope: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub is_prefixal_scope: i64,
    pub deadline: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub insert_only: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub end_user: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub return_body: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub persistent_ops: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub persistent_pipeline: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub save_key: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub fsize_min: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub fsize_limit: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mime_limit: String,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl PutPolicy {
    /// Build the policy for `category` on behalf of `user`. `deadline` is
    /// filled in by [`PutPolicy::upload_token`].
    pub fn for_category(category: &QiniuCategory, user: &str) -> Self {
        Self {
            scope: category.scope.clone(),
            is_prefixal_scope: category.is_prefixal_scope,
            deadline: 0,
            insert_only: category.insert_only,
            end_user: user.to_string(),
            return_body: return_body(&category.return_body),
            persistent_ops: persistent_ops(category, user),
            persistent_pipeline: category.persistent_pipeline.clone(),
            save_key: category.save_key.clone(),
            fsize_min: category.fsize_min,
            fsize_limit: category.fsize_limit,
            mime_limit: category.mime_limit.clone(),
        }
    }

    /// Set the deadline to `now + expires` seconds and sign the policy.
    pub fn upload_token(mut self, credentials: &Credentials, expires: u64, now: DateTime<Utc>) -> String {
        self.deadline = now.timestamp() + expires as i64;
        // Serializing a struct of strings and integers cannot fail
        let policy = serde_json::to_vec(&self).unwrap_or_default();
        credentials.sign_with_data(&policy)
    }
}

/// Watermark marker identifying the uploader: URL-safe base64 of `ID:<user>`.
pub fn watermark_text(user: &str) -> String {
    URL_SAFE.encode(format!("ID:{}", user))
}

/// Post-processing operations, `;`-joined in op-name order. Each op gets the
/// watermark substituted for its first `${wmText}` and a `saveas` target.
pub fn persistent_ops(category: &QiniuCategory, user: &str) -> String {
    let watermark = watermark_text(user);
    category
        .persistent_ops
        .values()
        .map(|op| {
            let fop = op.pfop.replacen("${wmText}", &watermark, 1);
            let save_as = URL_SAFE.encode(format!("{}:{}", op.save_bucket, op.save_key));
            format!("{}|saveas/{}", fop, save_as)
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// JSON template of the fields reported back after upload.
pub fn return_body(extra: &[String]) -> String {
    let mut items = vec![
        r#""etag":$(etag)"#.to_string(),
        r#""key":$(key)"#.to_string(),
        r#""size":$(fsize)"#.to_string(),
        r#""mime_type":$(mimeType)"#.to_string(),
    ];
    items.extend(extra.iter().cloned());
    format!("{{{}}}", items.join(","))
}

/// Sign a download URL for `key` under `domain` valid until `deadline`
/// (unix seconds).
pub fn make_private_url(credentials: &Credentials, domain: &str, key: &str, deadline: i64) -> String {
    let public = format!(
        "{}/{}",
        domain.trim_end_matches('/'),
        utf8_percent_encode(key, KEY_PATH)
    );
    let separator = if public.contains('?') { '&' } else { '?' };
    let to_sign = format!("{}{}e={}", public, separator, deadline);
    let token = credentials.sign(to_sign.as_bytes());
    format!("{}&token={}", to_sign, token)
}

/// Qiniu adapter configured with account keys and upload categories.
#[derive(Clone)]
pub struct QiniuProvider {
    config: QiniuConfig,
    credentials: Credentials,
}

impl QiniuProvider {
    pub fn new(config: QiniuConfig) -> Self {
        let credentials = Credentials::new(&config.access_key, &config.secret_key);
        Self {
            config,
            credentials,
        }
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.config.category.contains_key(category)
    }

    /// Issue an upload token for `category`. Unknown categories are rejected
    /// before any policy is built.
    pub fn upload_token(&self, category: &str, user: &str) -> AppResult<UploadToken> {
        let category_config = self
            .config
            .category
            .get(category)
            .ok_or_else(|| AppError::invalid_parameter(format!("unknown category: {}", category)))?;

        let duration = lifetime(self.config.token_duration);
        let now = Utc::now();
        let token = PutPolicy::for_category(category_config, user).upload_token(
            &self.credentials,
            duration,
            now,
        );

        Ok(UploadToken {
            bucket: category_config.bucket.clone(),
            token,
            expiration: now + Duration::seconds(duration as i64),
        })
    }

    /// Sign a private download URL. `domain` may be a configured alias.
    pub fn private_url(&self, domain: &str, key: &str) -> PrivateUrl {
        let base = self
            .config
            .domain
            .get(domain)
            .map(String::as_str)
            .unwrap_or(domain);
        let expiration = Utc::now() + Duration::seconds(lifetime(self.config.private_url_duration) as i64);
        PrivateUrl {
            url: make_private_url(&self.credentials, base, key, expiration.timestamp()),
            expiration,
        }
    }
}

/// Configured lifetime in seconds, defaulted when zero and capped at
/// [`MAX_TOKEN_DURATION`] so deadlines stay within `i64` and chrono's range.
fn lifetime(duration: u64) -> u64 {
    match duration {
        0 => DEFAULT_TOKEN_DURATION,
        d => d.min(MAX_TOKEN_DURATION),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistentOp;
    use crate::errors::ErrorCode;
    use chrono::TimeZone;

    fn avatar_category() -> QiniuCategory {
        let mut category = QiniuCategory {
            bucket: "avatars".into(),
            scope: "avatars".into(),
            save_key: "$(etag)$(ext)".into(),
            mime_limit: "image/*".into(),
            fsize_limit: 1024,
            insert_only: 1,
            persistent_pipeline: "pipe".into(),
            return_body: vec![r#""w":$(imageInfo.width)"#.into()],
            ..Default::default()
        };
        category.persistent_ops.insert(
            "b-watermark".into(),
            PersistentOp {
                pfop: "watermark/2/text/${wmText}".into(),
                save_bucket: "avatars".into(),
                save_key: "wm".into(),
            },
        );
        category.persistent_ops.insert(
            "a-thumb".into(),
            PersistentOp {
                pfop: "imageView2/1/w/200".into(),
                save_bucket: "thumbs".into(),
                save_key: "t".into(),
            },
        );
        category
    }

    fn provider() -> QiniuProvider {
        let mut config = QiniuConfig {
            access_key: "ak".into(),
            secret_key: "sk".into(),
            token_duration: 600,
            private_url_duration: 300,
            ..Default::default()
        };
        config.category.insert("avatar".into(), avatar_category());
        config
            .domain
            .insert("avatar".into(), "http://cdn.example.com/".into());
        QiniuProvider::new(config)
    }

    fn verify(secret: &str, data: &[u8], signature: &str) {
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(data);
        let raw = URL_SAFE.decode(signature).unwrap();
        mac.verify_slice(&raw).unwrap();
    }

    #[test]
    fn watermark_encodes_user_id() {
        assert_eq!(watermark_text("42"), URL_SAFE.encode("ID:42"));
    }

    #[test]
    fn persistent_ops_are_ordered_and_parameterized() {
        let ops = persistent_ops(&avatar_category(), "42");
        let parts: Vec<&str> = ops.split(';').collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0],
            format!("imageView2/1/w/200|saveas/{}", URL_SAFE.encode("thumbs:t"))
        );
        assert_eq!(
            parts[1],
            format!(
                "watermark/2/text/{}|saveas/{}",
                watermark_text("42"),
                URL_SAFE.encode("avatars:wm")
            )
        );
    }

    #[test]
    fn return_body_lists_standard_then_extra_fields() {
        let body = return_body(&[r#""w":$(imageInfo.width)"#.to_string()]);
        assert_eq!(
            body,
            r#"{"etag":$(etag),"key":$(key),"size":$(fsize),"mime_type":$(mimeType),"w":$(imageInfo.width)}"#
        );
    }

    #[test]
    fn upload_token_embeds_signed_policy() {
        let credentials = Credentials::new("ak", "sk");
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let token = PutPolicy::for_category(&avatar_category(), "42").upload_token(&credentials, 600, now);

        let parts: Vec<&str> = token.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ak");
        verify("sk", parts[2].as_bytes(), parts[1]);

        let policy: serde_json::Value =
            serde_json::from_slice(&URL_SAFE.decode(parts[2]).unwrap()).unwrap();
        assert_eq!(policy["scope"], "avatars");
        assert_eq!(policy["deadline"], now.timestamp() + 600);
        assert_eq!(policy["endUser"], "42");
        assert_eq!(policy["insertOnly"], 1);
        assert_eq!(policy["fsizeLimit"], 1024);
        assert_eq!(policy["mimeLimit"], "image/*");
        assert_eq!(policy["persistentPipeline"], "pipe");
        assert!(policy.get("isPrefixalScope").is_none());
        assert!(policy.get("fsizeMin").is_none());
    }

    #[test]
    fn unknown_category_is_invalid_parameter() {
        let err = provider().upload_token("banner", "42").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
        assert_eq!(err.message, "unknown category: banner");
    }

    #[test]
    fn upload_token_reports_bucket_and_expiration() {
        let before = Utc::now();
        let token = provider().upload_token("avatar", "42").unwrap();
        assert_eq!(token.bucket, "avatars");
        assert!(token.token.starts_with("ak:"));
        assert!(token.expiration >= before + Duration::seconds(600));
    }

    #[test]
    fn oversized_durations_are_capped() {
        let mut config = QiniuConfig {
            access_key: "ak".into(),
            secret_key: "sk".into(),
            token_duration: u64::MAX,
            private_url_duration: u64::MAX,
            ..Default::default()
        };
        config.category.insert("avatar".into(), avatar_category());
        let provider = QiniuProvider::new(config);

        let limit = Utc::now() + Duration::seconds(MAX_TOKEN_DURATION as i64 + 60);
        let token = provider.upload_token("avatar", "42").unwrap();
        assert!(token.expiration <= limit);
        let url = provider.private_url("http://cdn.example.com", "k");
        assert!(url.expiration <= limit);

        assert_eq!(lifetime(0), DEFAULT_TOKEN_DURATION);
        assert_eq!(lifetime(600), 600);
    }

    #[test]
    fn private_url_is_signed_over_deadline() {
        let credentials = Credentials::new("ak", "sk");
        let url = make_private_url(&credentials, "http://cdn.example.com/", "a b/c.png", 1700000000);

        let (to_sign, token) = url.split_once("&token=").unwrap();
        assert_eq!(to_sign, "http://cdn.example.com/a%20b/c.png?e=1700000000");
        let (ak, signature) = token.split_once(':').unwrap();
        assert_eq!(ak, "ak");
        verify("sk", to_sign.as_bytes(), signature);
    }

    #[test]
    fn private_url_resolves_domain_alias() {
        let url = provider().private_url("avatar", "k.png");
        assert!(url.url.starts_with("http://cdn.example.com/k.png?e="));
        assert!(url.expiration > Utc::now());
    }
}
