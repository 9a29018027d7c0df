#![forbid(unsafe_code)]

//! Signed cookie codec for [`SessionState`].
//!
//! Cookie value layout: `base64url(json envelope) "." base64url(hmac-sha256(json envelope))`.
//! The envelope carries the issue time so stale cookies can be refused server side.

use axum::http::header::{HeaderValue, COOKIE};
use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use formic_kernel_contracts::session::SessionState;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub const SESSION_COOKIE_NAME: &str = "session";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionCookieError {
    #[error("session cookie is malformed")]
    Malformed,
    #[error("session cookie signature mismatch")]
    BadSignature,
    #[error("session cookie expired")]
    Expired,
    #[error("session cookie could not be encoded: {0}")]
    Encode(String),
}

#[derive(Serialize, Deserialize)]
struct SignedEnvelope {
    iat: u64,
    state: SessionState,
}

#[derive(Clone)]
pub struct SessionCodec {
    key: Vec<u8>,
    max_age_secs: u64,
}

impl std::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCodec")
            .field("key", &"<redacted>")
            .field("max_age_secs", &self.max_age_secs)
            .finish()
    }
}

impl SessionCodec {
    pub fn new(secret: &str, max_age_secs: u64) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
            max_age_secs,
        }
    }

    pub fn encode(&self, state: &SessionState, now: u64) -> Result<String, SessionCookieError> {
        let payload = serde_json::to_vec(&SignedEnvelope {
            iat: now,
            state: state.clone(),
        })
        .map_err(|err| SessionCookieError::Encode(err.to_string()))?;
        let signature = self.mac(&payload)?.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    pub fn decode(&self, raw: &str, now: u64) -> Result<SessionState, SessionCookieError> {
        let (payload_b64, signature_b64) =
            raw.split_once('.').ok_or(SessionCookieError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| SessionCookieError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| SessionCookieError::Malformed)?;
        self.mac(&payload)?
            .verify_slice(&signature)
            .map_err(|_| SessionCookieError::BadSignature)?;
        let envelope: SignedEnvelope =
            serde_json::from_slice(&payload).map_err(|_| SessionCookieError::Malformed)?;
        if now > envelope.iat.saturating_add(self.max_age_secs) {
            return Err(SessionCookieError::Expired);
        }
        Ok(envelope.state)
    }

    /// Reads the session cookie from request headers. `None` means no cookie was sent.
    pub fn decode_headers(
        &self,
        headers: &HeaderMap,
        now: u64,
    ) -> Option<Result<SessionState, SessionCookieError>> {
        session_cookie_value(headers).map(|raw| self.decode(raw, now))
    }

    pub fn set_cookie(&self, value: &str) -> Result<HeaderValue, SessionCookieError> {
        HeaderValue::from_str(&format!(
            "{SESSION_COOKIE_NAME}={value}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            self.max_age_secs
        ))
        .map_err(|err| SessionCookieError::Encode(err.to_string()))
    }

    pub fn expired_cookie() -> HeaderValue {
        HeaderValue::from_static("session=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")
    }

    fn mac(&self, payload: &[u8]) -> Result<HmacSha256, SessionCookieError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|err| SessionCookieError::Encode(err.to_string()))?;
        mac.update(payload);
        Ok(mac)
    }
}

fn session_cookie_value(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE_NAME)
        .map(|(_, value)| value)
}
