#![forbid(unsafe_code)]

//! Startup configuration: an optional TOML file overlaid with `FORMIC_*` environment variables.

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use formic_engines::identity_provider::{
    GOOGLE_AUTHORIZE_URL, GOOGLE_PROFILE_URL, GOOGLE_TOKEN_URL,
};
use formic_kernel_contracts::DeploymentVariant;
use serde::Deserialize;

use crate::telemetry::LogFormat;

pub const DEFAULT_CONFIG_FILE: &str = "formic.toml";
pub const ENV_PREFIX: &str = "FORMIC_";

const DEFAULT_REDIS_HOST: &str = "localhost";
const DEFAULT_BIND: &str = "127.0.0.1:8000";
const DEFAULT_SESSION_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;
const DEFAULT_REDIS_POOL_SIZE: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Missing config: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Raw file contents. Keys use the dashed spelling (`redis-host = "..."`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FileConfig {
    pub bind: Option<String>,
    pub variant: Option<String>,
    pub redis_host: Option<String>,
    pub redis_pool_size: Option<u32>,
    pub session_secret: Option<String>,
    pub session_max_age_secs: Option<u64>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub google_allowed_emails: Option<String>,
    pub oauth_authorize_url: Option<String>,
    pub oauth_token_url: Option<String>,
    pub oauth_profile_url: Option<String>,
    pub log_format: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FormicConfig {
    pub bind: SocketAddr,
    pub variant: DeploymentVariant,
    /// Redis host name, or `memory` for the in-process backend.
    pub redis_host: String,
    pub redis_pool_size: u32,
    pub session_secret: String,
    pub session_max_age_secs: u64,
    pub google_client_id: String,
    pub google_client_secret: String,
    pub google_allowed_emails: String,
    pub oauth_authorize_url: String,
    pub oauth_token_url: String,
    pub oauth_profile_url: String,
    pub log_format: LogFormat,
}

impl FormicConfig {
    /// Loads `path` (or `formic.toml` when present in the working directory) and applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => read_file_config(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    read_file_config(default)?
                } else {
                    FileConfig::default()
                }
            }
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merges file values with environment lookups; environment wins.
    pub fn resolve<F>(file: FileConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |name: &str, from_file: Option<String>| -> Option<String> {
            env(&format!("{ENV_PREFIX}{name}"))
                .or(from_file)
                .filter(|v| !v.trim().is_empty())
        };

        let session_secret = pick("SESSION_SECRET", file.session_secret);
        let google_client_id = pick("GOOGLE_CLIENT_ID", file.google_client_id);
        let google_client_secret = pick("GOOGLE_CLIENT_SECRET", file.google_client_secret);
        let google_allowed_emails = pick("GOOGLE_ALLOWED_EMAILS", file.google_allowed_emails);

        let mut missing = Vec::new();
        if session_secret.is_none() {
            missing.push("Session Secret");
        }
        if google_client_id.is_none() {
            missing.push("Google Client ID");
        }
        if google_client_secret.is_none() {
            missing.push("Google Client Secret");
        }
        if google_allowed_emails.is_none() {
            missing.push("Google Allowed Emails");
        }
        let (
            Some(session_secret),
            Some(google_client_id),
            Some(google_client_secret),
            Some(google_allowed_emails),
        ) = (
            session_secret,
            google_client_id,
            google_client_secret,
            google_allowed_emails,
        )
        else {
            return Err(ConfigError::Missing(missing));
        };

        let bind_raw = pick("BIND", file.bind).unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            key: "bind",
            reason: format!("not a socket address: {bind_raw}"),
        })?;

        let variant = match pick("VARIANT", file.variant) {
            Some(raw) => DeploymentVariant::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "variant",
                reason: format!("expected multi or single, got {raw}"),
            })?,
            None => DeploymentVariant::MultiTenant,
        };

        let session_max_age_secs = parse_number(
            "session_max_age_secs",
            pick("SESSION_MAX_AGE_SECS", None),
            file.session_max_age_secs,
            DEFAULT_SESSION_MAX_AGE_SECS,
        )?;
        let redis_pool_size = parse_number(
            "redis_pool_size",
            pick("REDIS_POOL_SIZE", None),
            file.redis_pool_size,
            DEFAULT_REDIS_POOL_SIZE,
        )?;
        if redis_pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: "redis_pool_size",
                reason: "must be > 0".to_string(),
            });
        }

        let log_format = match pick("LOG_FORMAT", file.log_format) {
            Some(raw) => LogFormat::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "log_format",
                reason: format!("expected text or json, got {raw}"),
            })?,
            None => LogFormat::Text,
        };

        Ok(Self {
            bind,
            variant,
            redis_host: pick("REDIS_HOST", file.redis_host)
                .unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string()),
            redis_pool_size,
            session_secret,
            session_max_age_secs,
            google_client_id,
            google_client_secret,
            google_allowed_emails,
            oauth_authorize_url: pick("OAUTH_AUTHORIZE_URL", file.oauth_authorize_url)
                .unwrap_or_else(|| GOOGLE_AUTHORIZE_URL.to_string()),
            oauth_token_url: pick("OAUTH_TOKEN_URL", file.oauth_token_url)
                .unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
            oauth_profile_url: pick("OAUTH_PROFILE_URL", file.oauth_profile_url)
                .unwrap_or_else(|| GOOGLE_PROFILE_URL.to_string()),
            log_format,
        })
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&raw)?)
}

fn parse_number<T: std::str::FromStr>(
    key: &'static str,
    from_env: Option<String>,
    from_file: Option<T>,
    default: T,
) -> Result<T, ConfigError> {
    match from_env {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            reason: format!("not a number: {raw}"),
        }),
        None => Ok(from_file.unwrap_or(default)),
    }
}
