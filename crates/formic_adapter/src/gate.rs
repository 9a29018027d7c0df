#![forbid(unsafe_code)]

//! Session resolution, the dashboard login gate and the OAuth callback.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::{Query, Request, State};
use axum::http::header::{HeaderValue, HOST, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use formic_engines::allow_list::AllowList;
use formic_engines::identity_provider::{IdentityProvider, ProviderError};
use formic_kernel_contracts::form::{Identity, OwnerId};
use formic_kernel_contracts::session::{FlashCategory, FlashMessage, SessionState};
use formic_kernel_contracts::DeploymentVariant;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::error::AdapterError;
use crate::http::run_blocking;
use crate::session::{SessionCodec, SessionCookieError};
use crate::{unix_now, SharedState};

pub const CALLBACK_PATH: &str = "/oauth2callback";
pub const DASHBOARD_PATH: &str = "/dashboard/";

/// Per-request session, shared between the session middleware and handlers.
#[derive(Clone, Default)]
pub struct SessionHandle {
    inner: Arc<Mutex<SessionSlot>>,
}

#[derive(Default)]
struct SessionSlot {
    state: SessionState,
    expire: bool,
}

impl SessionHandle {
    pub fn from_state(state: SessionState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionSlot {
                state,
                expire: false,
            })),
        }
    }

    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn identity(&self) -> Option<Identity> {
        self.slot().state.identity()
    }

    pub fn log_in(&self, identity: Identity) {
        let mut slot = self.slot();
        slot.expire = false;
        slot.state.log_in(identity);
    }

    pub fn add_flash(&self, category: FlashCategory, text: impl Into<String>) {
        self.slot().state.add_flash(category, text);
    }

    pub fn drain_flashes(&self) -> Vec<FlashMessage> {
        self.slot().state.drain_flashes()
    }

    /// Drops all session contents and expires the cookie on this response.
    pub fn clear(&self) {
        let mut slot = self.slot();
        slot.state = SessionState::default();
        slot.expire = true;
    }

    fn cookie_update(
        &self,
        codec: &SessionCodec,
        now: u64,
    ) -> Option<Result<HeaderValue, SessionCookieError>> {
        let mut slot = self.slot();
        if slot.state.is_dirty() {
            let update = codec
                .encode(&slot.state, now)
                .and_then(|value| codec.set_cookie(&value));
            slot.state.mark_clean();
            return Some(update);
        }
        if slot.expire {
            return Some(Ok(SessionCodec::expired_cookie()));
        }
        None
    }
}

/// Resolves the session cookie into a [`SessionHandle`] request extension and writes the
/// cookie back when the session changed.
pub async fn session_layer(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let now = unix_now();
    let handle = match state.sessions.decode_headers(request.headers(), now) {
        None => SessionHandle::default(),
        Some(Ok(session)) => SessionHandle::from_state(session),
        Some(Err(err)) => {
            warn!(error = %err, "discarding session cookie");
            let handle = SessionHandle::default();
            handle.clear();
            handle
        }
    };
    request.extensions_mut().insert(handle.clone());

    let mut response = next.run(request).await;
    match handle.cookie_update(&state.sessions, now) {
        Some(Ok(cookie)) => {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        Some(Err(err)) => error!(error = %err, "failed to write session cookie"),
        None => {}
    }
    response
}

/// Admits requests whose session carries an identity matching the deployment variant and
/// exposes it as an [`Identity`] extension. Everyone else goes to the provider.
pub async fn require_login(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = request
        .extensions()
        .get::<SessionHandle>()
        .and_then(SessionHandle::identity)
        .filter(|identity| identity_fits(identity, state.variant));
    match identity {
        Some(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        None => found(&state.provider.authorize_url(&callback_url(request.headers()))),
    }
}

fn identity_fits(identity: &Identity, variant: DeploymentVariant) -> bool {
    matches!(
        (identity, variant),
        (Identity::Owner(_), DeploymentVariant::MultiTenant)
            | (Identity::Admin, DeploymentVariant::SingleTenant)
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Accepted(Identity),
    Denied,
}

/// Runs the code exchange and profile fetch, then applies the allow-list. Blocking.
pub fn complete_login(
    provider: &dyn IdentityProvider,
    allow_list: &AllowList,
    variant: DeploymentVariant,
    code: &str,
    redirect_uri: &str,
) -> Result<LoginOutcome, ProviderError> {
    let token = provider.exchange_code(code, redirect_uri)?;
    let profile = provider.fetch_profile(&token)?;

    if !allow_list.permits(&profile.primary_email) {
        return Ok(LoginOutcome::Denied);
    }

    let identity = match variant {
        DeploymentVariant::MultiTenant => {
            let id = profile
                .id
                .ok_or_else(|| ProviderError::new("profile", "id_missing", None))?;
            let owner =
                OwnerId::new(id).map_err(|_| ProviderError::new("profile", "id_malformed", None))?;
            Identity::Owner(owner)
        }
        DeploymentVariant::SingleTenant => Identity::Admin,
    };
    Ok(LoginOutcome::Accepted(identity))
}

pub async fn oauth_callback(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionHandle>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AdapterError> {
    let code = params
        .code
        .filter(|code| !code.is_empty())
        .ok_or(AdapterError::Forbidden)?;
    let redirect_uri = callback_url(&headers);

    let app = state.clone();
    let outcome = run_blocking(move || {
        complete_login(
            app.provider.as_ref(),
            &app.allow_list,
            app.variant,
            &code,
            &redirect_uri,
        )
    })
    .await??;

    match outcome {
        LoginOutcome::Accepted(identity) => {
            info!(variant = state.variant.as_str(), "login accepted");
            session.log_in(identity);
            Ok(found(DASHBOARD_PATH))
        }
        LoginOutcome::Denied => {
            info!(variant = state.variant.as_str(), "login denied: email not allowed");
            Ok(found("/"))
        }
    }
}

pub async fn logout(Extension(session): Extension<SessionHandle>) -> Response {
    session.clear();
    found("/")
}

/// `<scheme>://<host>` of the request as seen by the client.
pub fn request_origin(headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("http");
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or("localhost");
    format!("{scheme}://{host}")
}

pub fn callback_url(headers: &HeaderMap) -> String {
    format!("{}{CALLBACK_PATH}", request_origin(headers))
}

/// 302 Found. `axum::response::Redirect::to` answers 303.
pub fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(_) => AdapterError::Internal("redirect location is not a valid header".to_string())
            .into_response(),
    }
}
