#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use formic_kernel_contracts::entry::EntryView;
use formic_kernel_contracts::form::{Form, FormDraft, FormId, Identity};
use formic_kernel_contracts::session::{FlashCategory, FlashMessage};
use formic_kernel_contracts::DeploymentVariant;
use formic_storage::StorageError;
use serde::Serialize;
use tracing::error;

use crate::error::AdapterError;
use crate::gate::{
    found, logout, oauth_callback, request_origin, require_login, session_layer, SessionHandle,
    CALLBACK_PATH, DASHBOARD_PATH,
};
use crate::SharedState;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const NO_ACCESS: &str = "You don't have access to this form";

#[derive(Debug, Serialize)]
pub struct IndexView {
    pub status: &'static str,
    pub variant: &'static str,
    pub signed_in: bool,
    pub dashboard_url: &'static str,
    pub messages: Vec<FlashMessage>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FormsView {
    pub forms: Vec<Form>,
    pub messages: Vec<FlashMessage>,
}

#[derive(Debug, Serialize)]
pub struct FormView {
    pub form: Form,
    /// Public submission endpoint for this form.
    pub form_url: String,
    pub fields: Vec<String>,
    pub entries: Vec<EntryView>,
    pub messages: Vec<FlashMessage>,
}

#[derive(Debug, Serialize)]
pub struct AckView {
    pub status: &'static str,
}

pub fn router(state: SharedState) -> Router {
    let form_routes = match state.variant {
        DeploymentVariant::MultiTenant => get(show_form).post(update_form).delete(delete_form),
        DeploymentVariant::SingleTenant => get(show_form),
    };
    let dashboard = Router::new()
        .route(DASHBOARD_PATH, get(list_forms).post(create_form))
        .route("/dashboard/:id", form_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_login));

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route(CALLBACK_PATH, get(oauth_callback))
        .route("/logout", get(logout))
        .route("/dashboard", get(|| async { found(DASHBOARD_PATH) }))
        .route("/s/:id", post(submit_entry))
        .merge(dashboard)
        .layer(middleware::from_fn_with_state(state.clone(), session_layer))
        .with_state(state)
}

/// Runs store or provider work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, AdapterError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| AdapterError::Internal(format!("blocking task failed: {err}")))
}

async fn index(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionHandle>,
) -> Json<IndexView> {
    Json(IndexView {
        status: "ok",
        variant: state.variant.as_str(),
        signed_in: session.identity().is_some(),
        dashboard_url: DASHBOARD_PATH,
        messages: session.drain_flashes(),
    })
}

async fn healthz(State(state): State<SharedState>) -> (StatusCode, Json<HealthResponse>) {
    let repo = state.repo.clone();
    let failure = match run_blocking(move || repo.ping()).await {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err.to_string()),
        Err(err) => Some(err.to_string()),
    };
    match failure {
        None => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                outcome: "HEALTHY".to_string(),
                reason: None,
            }),
        ),
        Some(reason) => {
            error!(reason = %reason, "health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HealthResponse {
                    status: "error".to_string(),
                    outcome: "UNHEALTHY".to_string(),
                    reason: Some(reason),
                }),
            )
        }
    }
}

async fn list_forms(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, AdapterError> {
    render_forms(&state, identity, &session).await
}

async fn create_form(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Extension(session): Extension<SessionHandle>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AdapterError> {
    let draft = draft_from(&first_values(parse_form_body(&headers, &body)?));
    let repo = state.repo.clone();
    let owner = identity.clone();
    match run_blocking(move || repo.create_form_row(&owner, &draft)).await? {
        Ok(form) => {
            session.add_flash(FlashCategory::Success, "Form created");
            Ok(found(&format!("{DASHBOARD_PATH}{}", form.id.as_str())))
        }
        Err(StorageError::Validation(violation)) => {
            session.add_flash(FlashCategory::Warning, violation.to_string());
            render_forms(&state, identity, &session).await
        }
        Err(err) => Err(err.into()),
    }
}

async fn show_form(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Extension(session): Extension<SessionHandle>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AdapterError> {
    let id = parse_form_id(&raw_id)?;
    render_form(&state, identity, id, &headers, &session).await
}

enum Mutation {
    Applied,
    Invalid(String),
    NoAccess,
    Missing,
}

async fn update_form(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Extension(session): Extension<SessionHandle>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AdapterError> {
    let id = parse_form_id(&raw_id)?;
    let draft = draft_from(&first_values(parse_form_body(&headers, &body)?));
    let repo = state.repo.clone();
    let (owner, target) = (identity.clone(), id.clone());
    let mutation = run_blocking(move || -> Result<Mutation, StorageError> {
        if !repo.owns_form_row(&owner, &target)? {
            return Ok(Mutation::NoAccess);
        }
        match repo.update_form_row(&target, &draft) {
            Ok(true) => Ok(Mutation::Applied),
            Ok(false) => Ok(Mutation::Missing),
            Err(StorageError::Validation(violation)) => {
                Ok(Mutation::Invalid(violation.to_string()))
            }
            Err(err) => Err(err),
        }
    })
    .await??;

    match mutation {
        Mutation::Applied => session.add_flash(FlashCategory::Info, "Form updated"),
        Mutation::Invalid(message) => session.add_flash(FlashCategory::Warning, message),
        Mutation::NoAccess => {
            session.add_flash(FlashCategory::Warning, NO_ACCESS);
            return Ok(found(DASHBOARD_PATH));
        }
        Mutation::Missing => return Err(AdapterError::NotFound),
    }
    render_form(&state, identity, id, &headers, &session).await
}

async fn delete_form(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Extension(session): Extension<SessionHandle>,
    Path(raw_id): Path<String>,
) -> Result<Json<AckView>, AdapterError> {
    let id = parse_form_id(&raw_id)?;
    let repo = state.repo.clone();
    let mutation = run_blocking(move || -> Result<Mutation, StorageError> {
        if !repo.owns_form_row(&identity, &id)? {
            return Ok(Mutation::NoAccess);
        }
        repo.delete_form_row(&identity, &id)?;
        Ok(Mutation::Applied)
    })
    .await??;

    match mutation {
        Mutation::Applied => {
            session.add_flash(FlashCategory::Success, "Form deleted");
            Ok(Json(AckView { status: "ok" }))
        }
        _ => {
            session.add_flash(FlashCategory::Warning, NO_ACCESS);
            Ok(Json(AckView { status: "denied" }))
        }
    }
}

/// Anonymous visitor submission. Every posted field is stored; repeated keys keep their
/// first value.
async fn submit_entry(
    State(state): State<SharedState>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AdapterError> {
    let id = parse_form_id(&raw_id)?;
    let fields = first_values(parse_form_body(&headers, &body)?);
    let repo = state.repo.clone();
    let submission = run_blocking(move || -> Result<Submission, StorageError> {
        let Some(form) = repo.get_form_row(&id)? else {
            return Ok(Submission::Missing);
        };
        // Refuse before writing so a retry cannot store the entry twice.
        let Ok(location) = HeaderValue::from_str(&form.redirect_url) else {
            return Ok(Submission::Unroutable(id));
        };
        repo.append_entry_row(&id, fields)?;
        Ok(Submission::Stored(location))
    })
    .await??;

    match submission {
        Submission::Stored(location) => {
            Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response())
        }
        Submission::Missing => Err(AdapterError::NotFound),
        Submission::Unroutable(id) => Err(AdapterError::Internal(format!(
            "form {id} has a redirect URL that is not a valid header"
        ))),
    }
}

enum Submission {
    Stored(HeaderValue),
    Missing,
    Unroutable(FormId),
}

async fn render_forms(
    state: &SharedState,
    identity: Identity,
    session: &SessionHandle,
) -> Result<Response, AdapterError> {
    let repo = state.repo.clone();
    let forms = run_blocking(move || repo.form_rows(&identity)).await??;
    Ok(Json(FormsView {
        forms,
        messages: session.drain_flashes(),
    })
    .into_response())
}

/// Form detail view. Forms outside the caller's active set read as absent.
async fn render_form(
    state: &SharedState,
    identity: Identity,
    id: FormId,
    headers: &HeaderMap,
    session: &SessionHandle,
) -> Result<Response, AdapterError> {
    let form_url = format!("{}/s/{}", request_origin(headers), id.as_str());
    let repo = state.repo.clone();
    let view = run_blocking(move || -> Result<Option<FormView>, StorageError> {
        if !repo.owns_form_row(&identity, &id)? {
            return Ok(None);
        }
        let Some(form) = repo.get_form_row(&id)? else {
            return Ok(None);
        };
        Ok(Some(FormView {
            form,
            form_url,
            fields: repo.field_names(&id)?.into_iter().collect(),
            entries: repo.entry_rows(&id)?,
            messages: Vec::new(),
        }))
    })
    .await??;

    let mut view = view.ok_or(AdapterError::NotFound)?;
    view.messages = session.drain_flashes();
    Ok(Json(view).into_response())
}

fn parse_form_id(raw: &str) -> Result<FormId, AdapterError> {
    FormId::new(raw).map_err(|_| AdapterError::NotFound)
}

fn draft_from(values: &BTreeMap<String, String>) -> FormDraft {
    let get = |key: &str| values.get(key).cloned().unwrap_or_default();
    FormDraft::v1(get("formName"), get("redirectURL"))
}

/// Decodes an `application/x-www-form-urlencoded` body. A missing content type is read as
/// urlencoded.
pub fn parse_form_body(
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Vec<(String, String)>, AdapterError> {
    if let Some(content_type) = headers.get(CONTENT_TYPE) {
        let content_type = content_type
            .to_str()
            .map_err(|_| AdapterError::BadRequest("unreadable content type".to_string()))?;
        let mime = content_type.split(';').next().unwrap_or_default().trim();
        if !mime.eq_ignore_ascii_case(FORM_URLENCODED) {
            return Err(AdapterError::BadRequest(format!(
                "unsupported content type {mime}"
            )));
        }
    }
    if std::str::from_utf8(body).is_err() {
        return Err(AdapterError::BadRequest("body is not valid utf-8".to_string()));
    }
    Ok(url::form_urlencoded::parse(body).into_owned().collect())
}

fn first_values(pairs: Vec<(String, String)>) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for (key, value) in pairs {
        values.entry(key).or_insert(value);
    }
    values
}
