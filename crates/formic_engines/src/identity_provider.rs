#![forbid(unsafe_code)]

use std::time::Duration;

use serde_json::Value;
use url::Url;

pub const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_PROFILE_URL: &str = "https://www.googleapis.com/plus/v1/people/me";

const REQUESTED_SCOPE: &str = "email";
const DEFAULT_TIMEOUT_MS: u32 = 10_000;
const DEFAULT_USER_AGENT: &str = "formic/0.1";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("identity provider stage={stage} error={kind}{}", status_suffix(.status))]
pub struct ProviderError {
    pub stage: &'static str,
    pub kind: &'static str,
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(stage: &'static str, kind: &'static str, status: Option<u16>) -> Self {
        Self { stage, kind, status }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" status={s}")).unwrap_or_default()
}

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// The parts of the provider profile the gate cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub id: Option<String>,
    pub primary_email: String,
}

/// Authorization-code flow against a third-party identity provider.
pub trait IdentityProvider: Send + Sync {
    fn authorize_url(&self, redirect_uri: &str) -> String;
    fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<AccessToken, ProviderError>;
    fn fetch_profile(&self, token: &AccessToken) -> Result<ProviderProfile, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub timeout_ms: u32,
    pub user_agent: String,
}

impl OAuthProviderConfig {
    pub fn google(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorize_url: GOOGLE_AUTHORIZE_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            profile_url: GOOGLE_PROFILE_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

pub struct OAuthProvider {
    config: OAuthProviderConfig,
    authorize_base: Url,
    agent: ureq::Agent,
}

impl OAuthProvider {
    pub fn new(config: OAuthProviderConfig) -> Result<Self, ProviderError> {
        let authorize_base = Url::parse(&config.authorize_url)
            .map_err(|_| ProviderError::new("authorize", "config_invalid", None))?;
        for endpoint in [&config.token_url, &config.profile_url] {
            Url::parse(endpoint).map_err(|_| ProviderError::new("config", "config_invalid", None))?;
        }
        let agent = build_http_agent(config.timeout_ms, &config.user_agent)
            .map_err(|_| ProviderError::new("config", "config_invalid", None))?;
        Ok(Self {
            config,
            authorize_base,
            agent,
        })
    }
}

impl IdentityProvider for OAuthProvider {
    fn authorize_url(&self, redirect_uri: &str) -> String {
        let mut url = self.authorize_base.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", REQUESTED_SCOPE);
        url.to_string()
    }

    fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<AccessToken, ProviderError> {
        let response = self
            .agent
            .post(&self.config.token_url)
            .set("Accept", "application/json")
            .send_form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .map_err(|err| provider_error_from_ureq("token", err))?;
        let body: Value = response
            .into_json()
            .map_err(|_| ProviderError::new("token", "json_parse", None))?;
        parse_token_response(&body)
    }

    fn fetch_profile(&self, token: &AccessToken) -> Result<ProviderProfile, ProviderError> {
        let response = self
            .agent
            .get(&self.config.profile_url)
            .set("Accept", "application/json")
            .set("Authorization", &format!("Bearer {}", token.as_str()))
            .call()
            .map_err(|err| provider_error_from_ureq("profile", err))?;
        let body: Value = response
            .into_json()
            .map_err(|_| ProviderError::new("profile", "json_parse", None))?;
        parse_profile(&body)
    }
}

pub fn parse_token_response(body: &Value) -> Result<AccessToken, ProviderError> {
    body.get("access_token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(AccessToken::new)
        .ok_or_else(|| ProviderError::new("token", "access_token_missing", None))
}

/// Extracts the profile id and the first listed email.
///
/// People-API shape (`{"id", "emails": [{"value"}]}`) is the primary contract. A bare
/// OpenID userinfo shape (`{"sub", "email"}`) is accepted only when `emails` is absent.
pub fn parse_profile(body: &Value) -> Result<ProviderProfile, ProviderError> {
    let id = body
        .get("id")
        .or_else(|| body.get("sub"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    let primary_email = match body.get("emails") {
        Some(emails) => {
            let first = emails
                .as_array()
                .ok_or_else(|| ProviderError::new("profile", "emails_malformed", None))?
                .first()
                .ok_or_else(|| ProviderError::new("profile", "emails_empty", None))?;
            first
                .get("value")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::new("profile", "email_malformed", None))?
                .to_string()
        }
        None => body
            .get("email")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::new("profile", "emails_missing", None))?
            .to_string(),
    };

    Ok(ProviderProfile { id, primary_email })
}

fn build_http_agent(timeout_ms: u32, user_agent: &str) -> Result<ureq::Agent, String> {
    if timeout_ms == 0 {
        return Err("timeout must be > 0".to_string());
    }
    let timeout = Duration::from_millis(u64::from(timeout_ms).max(100));
    Ok(ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .timeout_write(timeout)
        .user_agent(user_agent)
        .build())
}

fn provider_error_from_ureq(stage: &'static str, err: ureq::Error) -> ProviderError {
    let mapped = match err {
        ureq::Error::Status(status, _) => ProviderError::new(stage, "http_non_200", Some(status)),
        ureq::Error::Transport(transport) => {
            let combined = format!("{:?} {}", transport.kind(), transport);
            ProviderError::new(stage, classify_transport_error_kind(&combined), None)
        }
    };
    tracing::warn!(
        stage = mapped.stage,
        kind = mapped.kind,
        status = mapped.status,
        "identity provider call failed"
    );
    mapped
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}
