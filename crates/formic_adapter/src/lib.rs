#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod gate;
pub mod http;
pub mod session;
pub mod telemetry;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use formic_engines::allow_list::AllowList;
use formic_engines::identity_provider::{
    IdentityProvider, OAuthProvider, OAuthProviderConfig, ProviderError,
};
use formic_kernel_contracts::DeploymentVariant;
use formic_storage::memory::MemoryBackend;
use formic_storage::redis_backend::RedisBackend;
use formic_storage::repo::FormRecordRepo;
use formic_storage::{BackendError, FormStore, StoreLayout};
use tracing::info;

use crate::config::FormicConfig;
use crate::session::SessionCodec;

pub use crate::error::AdapterError;
pub use crate::http::router;

/// Redis host value that selects the in-process backend.
pub const MEMORY_BACKEND_HOST: &str = "memory";

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("backend unavailable: {0}")]
    Backend(#[from] BackendError),
    #[error("identity provider misconfigured: {0}")]
    Provider(#[from] ProviderError),
}

/// Everything a request handler needs. Shared behind an `Arc`.
pub struct AppState {
    pub variant: DeploymentVariant,
    pub repo: Arc<dyn FormRecordRepo>,
    pub provider: Arc<dyn IdentityProvider>,
    pub allow_list: AllowList,
    pub sessions: SessionCodec,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        repo: Arc<dyn FormRecordRepo>,
        provider: Arc<dyn IdentityProvider>,
        allow_list: AllowList,
        sessions: SessionCodec,
    ) -> Self {
        Self {
            variant: repo.variant(),
            repo,
            provider,
            allow_list,
            sessions,
        }
    }

    pub fn from_config(config: &FormicConfig) -> Result<Self, StartupError> {
        let layout = StoreLayout::for_variant(config.variant);
        let repo: Arc<dyn FormRecordRepo> = if config.redis_host == MEMORY_BACKEND_HOST {
            info!(variant = config.variant.as_str(), "using in-memory backend");
            Arc::new(FormStore::new(MemoryBackend::new(), layout))
        } else {
            info!(
                variant = config.variant.as_str(),
                redis_host = %config.redis_host,
                pool_size = config.redis_pool_size,
                "connecting to redis"
            );
            let backend = RedisBackend::connect(&config.redis_host, config.redis_pool_size)?;
            Arc::new(FormStore::new(backend, layout))
        };

        let mut provider_config = OAuthProviderConfig::google(
            config.google_client_id.clone(),
            config.google_client_secret.clone(),
        );
        provider_config.authorize_url = config.oauth_authorize_url.clone();
        provider_config.token_url = config.oauth_token_url.clone();
        provider_config.profile_url = config.oauth_profile_url.clone();
        let provider = OAuthProvider::new(provider_config)?;

        Ok(Self::new(
            repo,
            Arc::new(provider),
            AllowList::parse(&config.google_allowed_emails),
            SessionCodec::new(&config.session_secret, config.session_max_age_secs),
        ))
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
