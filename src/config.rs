use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, ConfigError, File, builder::DefaultState};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    env,
    path::{Path, PathBuf},
};

/// Prefix for every environment override, e.g. `STASH_SERVER_PORT`.
pub const ENV_PREFIX: &str = "STASH";

const STASH_KEYS: [&str; 13] = [
    "debug",
    "server.addr",
    "server.port",
    "server.request_timeout_secs",
    "database.url",
    "database.max_connections",
    "aliyun.endpoint",
    "aliyun.access_key_id",
    "aliyun.access_key_secret",
    "aliyun.role_arn_oss_wr",
    "aliyun.session_name",
    "aliyun.token_duration",
    "aliyun.timeout_secs",
];

const QINIU_KEYS: [&str; 4] = [
    "access_key",
    "secret_key",
    "token_duration",
    "private_url_duration",
];

/// Centralized application configuration.
/// Built once at startup and handed to every component that needs it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Enables per-request tracing of the HTTP layer.
    pub debug: bool,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub aliyun: AliyunConfig,
    /// Loaded from its own file (`qiniu.toml`), not from `stash.toml`.
    #[serde(skip)]
    pub qiniu: QiniuConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0".into(),
            port: 8000,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/stash.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

/// Credentials and role used for STS `AssumeRole`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AliyunConfig {
    pub endpoint: String,
    pub access_key_id: String,
    pub access_key_secret: String,
    pub role_arn_oss_wr: String,
    pub session_name: String,
    /// Lifetime of issued credentials, in seconds.
    pub token_duration: u64,
    pub timeout_secs: u64,
}

impl Default for AliyunConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://sts.aliyuncs.com".into(),
            access_key_id: String::new(),
            access_key_secret: String::new(),
            role_arn_oss_wr: String::new(),
            session_name: "stash".into(),
            token_duration: 3600,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QiniuConfig {
    pub access_key: String,
    pub secret_key: String,
    /// Upload token lifetime in seconds.
    pub token_duration: u64,
    /// Private download URL lifetime in seconds.
    pub private_url_duration: u64,
    /// Domain aliases accepted by the download URL endpoint.
    pub domain: HashMap<String, String>,
    pub category: HashMap<String, QiniuCategory>,
}

/// A named upload policy template.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QiniuCategory {
    pub bucket: String,
    pub save_key: String,
    pub scope: String,
    pub is_prefixal_scope: i64,
    pub mime_limit: String,
    pub fsize_limit: i64,
    pub fsize_min: i64,
    pub insert_only: i64,
    /// Keyed by operation name; applied in name order.
    pub persistent_ops: BTreeMap<String, PersistentOp>,
    pub persistent_pipeline: String,
    /// Extra `"name":$(var)` items appended to the return body.
    pub return_body: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersistentOp {
    pub pfop: String,
    #[serde(alias = "save_bueket")]
    pub save_bucket: String,
    pub save_key: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Upload token and object reference service")]
pub struct Args {
    /// Directory holding stash.toml and qiniu.toml (overrides STASH_CONFIG_PATH)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Host to bind to (overrides server.addr)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides server.port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides database.url)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Apply the schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse CLI args, then load the config files and environment overrides.
    /// Returns the merged config and the migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let config_path = match args.config_path {
            Some(path) => path,
            None => match env::var("STASH_CONFIG_PATH") {
                Ok(path) if !path.is_empty() => PathBuf::from(path),
                _ => {
                    tracing::warn!("no STASH_CONFIG_PATH in env, using default `config`");
                    PathBuf::from("config")
                }
            },
        };
        tracing::info!("loading configuration from {}", config_path.display());

        let mut cfg = Self::load(&config_path, |name| env::var(name).ok())
            .with_context(|| format!("loading configuration from {}", config_path.display()))?;

        if let Some(host) = args.host {
            cfg.server.addr = host;
        }
        if let Some(port) = args.port {
            cfg.server.port = port;
        }
        if let Some(url) = args.database_url {
            cfg.database.url = url;
        }

        Ok((cfg, args.migrate))
    }

    /// Load `stash` and `qiniu` config files from `dir`, applying overrides
    /// found through `lookup` (normally the process environment).
    pub fn load<F>(dir: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let stash = Config::builder().add_source(File::from(dir.join("stash")).required(true));
        let stash = apply_overrides(stash, None, &STASH_KEYS, &lookup)?;
        let mut cfg: AppConfig = stash.build()?.try_deserialize()?;

        let qiniu = Config::builder().add_source(File::from(dir.join("qiniu")).required(true));
        let qiniu = apply_overrides(qiniu, Some("qiniu"), &QINIU_KEYS, &lookup)?;
        cfg.qiniu = qiniu.build()?.try_deserialize()?;

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.server.addr, self.server.port)
    }
}

/// Environment variable consulted for a config key:
/// prefix, optional namespace, `.` replaced by `_`, upper-cased.
pub fn env_var_name(namespace: Option<&str>, key: &str) -> String {
    let dotted = match namespace {
        Some(ns) => format!("{}.{}.{}", ENV_PREFIX, ns, key),
        None => format!("{}.{}", ENV_PREFIX, key),
    };
    dotted.replace('.', "_").to_uppercase()
}

fn apply_overrides<F>(
    mut builder: config::ConfigBuilder<DefaultState>,
    namespace: Option<&str>,
    keys: &[&str],
    lookup: &F,
) -> Result<config::ConfigBuilder<DefaultState>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(&env_var_name(namespace, key)) {
            builder = builder.set_override(*key, value)?;
        }
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config_dir() -> PathBuf {
        let dir = env::temp_dir().join(format!("stash-config-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("stash.toml"),
            r#"
debug = true

[server]
addr = "127.0.0.1"
port = 9000

[aliyun]
role_arn_oss_wr = "acs:ram::1:role/writer"
token_duration = 900
"#,
        )
        .unwrap();
        fs::write(
            dir.join("qiniu.toml"),
            r#"
access_key = "ak"
secret_key = "sk"
token_duration = 600

[category.avatar]
bucket = "avatars"
scope = "avatars"

[category.avatar.persistent_ops.thumb]
pfop = "imageView2/1/w/100"
save_bueket = "thumbs"
save_key = "$(key)-100"
"#,
        )
        .unwrap();
        dir
    }

    #[test]
    fn env_var_names_replace_dots() {
        assert_eq!(env_var_name(None, "server.port"), "STASH_SERVER_PORT");
        assert_eq!(
            env_var_name(Some("qiniu"), "access_key"),
            "STASH_QINIU_ACCESS_KEY"
        );
    }

    #[test]
    fn loads_files_with_defaults() {
        let dir = write_config_dir();
        let cfg = AppConfig::load(&dir, |_| None).unwrap();

        assert!(cfg.debug);
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.server.request_timeout_secs, 30);
        assert_eq!(cfg.database.max_connections, 5);
        assert_eq!(cfg.aliyun.token_duration, 900);
        assert_eq!(cfg.aliyun.endpoint, "https://sts.aliyuncs.com");
        assert_eq!(cfg.qiniu.token_duration, 600);

        let avatar = &cfg.qiniu.category["avatar"];
        assert_eq!(avatar.bucket, "avatars");
        assert_eq!(avatar.persistent_ops["thumb"].save_bucket, "thumbs");

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn environment_overrides_file_values() {
        let dir = write_config_dir();
        let cfg = AppConfig::load(&dir, |name| match name {
            "STASH_SERVER_PORT" => Some("9100".into()),
            "STASH_DATABASE_URL" => Some("sqlite::memory:".into()),
            "STASH_QINIU_SECRET_KEY" => Some("from-env".into()),
            _ => None,
        })
        .unwrap();

        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.database.url, "sqlite::memory:");
        assert_eq!(cfg.qiniu.secret_key, "from-env");
        assert_eq!(cfg.qiniu.access_key, "ak");

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_files_are_an_error() {
        let dir = env::temp_dir().join(format!("stash-missing-{}", uuid::Uuid::new_v4()));
        assert!(AppConfig::load(&dir, |_| None).is_err());
    }
}
