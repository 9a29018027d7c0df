#![forbid(unsafe_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::header::{CONTENT_TYPE, COOKIE, HOST, LOCATION, SET_COOKIE};
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use formic_adapter::session::SessionCodec;
use formic_adapter::{router, AppState};
use formic_engines::allow_list::AllowList;
use formic_engines::identity_provider::{
    AccessToken, IdentityProvider, ProviderError, ProviderProfile,
};
use formic_kernel_contracts::form::FormId;
use formic_kernel_contracts::DeploymentVariant;
use formic_storage::memory::MemoryBackend;
use formic_storage::repo::FormRecordRepo;
use formic_storage::{FormStore, KvBackend, StoreLayout, WriteBatch};
use serde_json::Value;
use tower::ServiceExt;

const HOST_NAME: &str = "forms.test";

/// The authorization code doubles as the account name.
struct FakeProvider;

impl IdentityProvider for FakeProvider {
    fn authorize_url(&self, redirect_uri: &str) -> String {
        format!("https://idp.test/auth?redirect_uri={redirect_uri}")
    }

    fn exchange_code(&self, code: &str, _: &str) -> Result<AccessToken, ProviderError> {
        if code == "fail" {
            return Err(ProviderError::new("token", "http_non_200", Some(500)));
        }
        Ok(AccessToken::new(code))
    }

    fn fetch_profile(&self, token: &AccessToken) -> Result<ProviderProfile, ProviderError> {
        let (id, email) = match token.as_str() {
            "alice" => ("1001", "a@x.com"),
            "bob" => ("1002", "b@x.com"),
            "carol" => ("1003", "c@x.com"),
            _ => return Err(ProviderError::new("profile", "emails_missing", None)),
        };
        Ok(ProviderProfile {
            id: Some(id.to_string()),
            primary_email: email.to_string(),
        })
    }
}

struct Harness {
    app: Router,
    store: Arc<FormStore<MemoryBackend>>,
}

fn harness(variant: DeploymentVariant, allowed: &str) -> Harness {
    let store = Arc::new(FormStore::new(
        MemoryBackend::new(),
        StoreLayout::for_variant(variant),
    ));
    let repo: Arc<dyn FormRecordRepo> = store.clone();
    let state = AppState::new(
        repo,
        Arc::new(FakeProvider),
        AllowList::parse(allowed),
        SessionCodec::new("test-secret", 3600),
    );
    Harness {
        app: router(Arc::new(state)),
        store,
    }
}

fn request(method: Method, path: &str, cookie: Option<&str>) -> axum::http::request::Builder {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(HOST, HOST_NAME);
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    builder
}

fn get(path: &str, cookie: Option<&str>) -> Request<Body> {
    request(Method::GET, path, cookie).body(Body::empty()).unwrap()
}

fn post_form(path: &str, body: &str, cookie: Option<&str>) -> Request<Body> {
    request(Method::POST, path, cookie)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(h: &Harness, req: Request<Body>) -> Response {
    h.app.clone().oneshot(req).await.unwrap()
}

fn location(resp: &Response) -> &str {
    resp.headers()[LOCATION].to_str().unwrap()
}

fn set_cookie(resp: &Response) -> Option<String> {
    resp.headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("session="))
        .map(str::to_string)
}

/// `name=value` part of the session Set-Cookie, ready for a Cookie header.
fn session_cookie(resp: &Response) -> Option<String> {
    set_cookie(resp).and_then(|raw| raw.split(';').next().map(str::to_string))
}

async fn json(resp: Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn log_in(h: &Harness, account: &str) -> String {
    let resp = send(h, get(&format!("/oauth2callback?code={account}"), None)).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "/dashboard/");
    session_cookie(&resp).expect("login sets the session cookie")
}

async fn create_form(h: &Harness, cookie: &str, name: &str) -> (String, String) {
    let resp = send(
        h,
        post_form(
            "/dashboard/",
            &format!("formName={name}&redirectURL=https%3A%2F%2Fexample.com%2Fthanks"),
            Some(cookie),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    let id = location(&resp)
        .strip_prefix("/dashboard/")
        .unwrap()
        .to_string();
    (id, session_cookie(&resp).unwrap())
}

#[tokio::test]
async fn at_gate_flow_01_anonymous_dashboard_redirects_to_provider() {
    let h = harness(DeploymentVariant::MultiTenant, "a@x.com");

    let resp = send(&h, get("/dashboard/", None)).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        location(&resp),
        "https://idp.test/auth?redirect_uri=http://forms.test/oauth2callback"
    );

    let forwarded = request(Method::GET, "/dashboard/", None)
        .header("x-forwarded-proto", "https")
        .body(Body::empty())
        .unwrap();
    let resp = send(&h, forwarded).await;
    assert_eq!(
        location(&resp),
        "https://idp.test/auth?redirect_uri=https://forms.test/oauth2callback"
    );
}

#[tokio::test]
async fn at_gate_flow_02_callback_without_code_is_forbidden() {
    let h = harness(DeploymentVariant::MultiTenant, "a@x.com");
    assert_eq!(
        send(&h, get("/oauth2callback", None)).await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        send(&h, get("/oauth2callback?code=", None)).await.status(),
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn at_gate_flow_03_allowed_email_reaches_the_dashboard() {
    let h = harness(DeploymentVariant::MultiTenant, "a@x.com,b@x.com");
    let cookie = log_in(&h, "alice").await;

    let resp = send(&h, get("/dashboard/", Some(&cookie))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["forms"], Value::Array(Vec::new()));
}

#[tokio::test]
async fn at_gate_flow_04_denied_email_goes_home_without_a_session() {
    let h = harness(DeploymentVariant::MultiTenant, "a@x.com,b@x.com");

    let resp = send(&h, get("/oauth2callback?code=carol", None)).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "/");
    assert!(set_cookie(&resp).is_none());
}

#[tokio::test]
async fn at_gate_flow_05_anyone_sentinel_admits_any_valid_email() {
    let h = harness(DeploymentVariant::MultiTenant, "anyone");
    log_in(&h, "carol").await;
}

#[tokio::test]
async fn at_gate_flow_06_provider_failure_is_a_server_error() {
    let h = harness(DeploymentVariant::MultiTenant, "anyone");
    let resp = send(&h, get("/oauth2callback?code=fail", None)).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(set_cookie(&resp).is_none());
    let body = json(resp).await;
    assert_eq!(body["status"], "error");

    let resp = send(&h, get("/oauth2callback?code=nobody", None)).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn at_gate_flow_07_created_form_flash_is_shown_once() {
    let h = harness(DeploymentVariant::MultiTenant, "a@x.com");
    let cookie = log_in(&h, "alice").await;
    let (id, cookie) = create_form(&h, &cookie, "Contact").await;

    let resp = send(&h, get(&format!("/dashboard/{id}"), Some(&cookie))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let drained = session_cookie(&resp).expect("draining flashes rewrites the cookie");
    let body = json(resp).await;
    assert_eq!(body["form"]["name"], "Contact");
    assert_eq!(body["form_url"], format!("http://forms.test/s/{id}"));
    assert_eq!(body["messages"][0]["type"], "success");
    assert_eq!(body["messages"][0]["text"], "Form created");

    let body = json(send(&h, get(&format!("/dashboard/{id}"), Some(&drained))).await).await;
    assert_eq!(body["messages"], Value::Array(Vec::new()));
}

#[tokio::test]
async fn at_gate_flow_08_invalid_form_warns_without_creating() {
    let h = harness(DeploymentVariant::MultiTenant, "a@x.com");
    let cookie = log_in(&h, "alice").await;

    let resp = send(
        &h,
        post_form("/dashboard/", "formName=&redirectURL=x", Some(&cookie)),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["messages"][0]["type"], "warning");
    assert_eq!(body["messages"][0]["text"], "Form name can't be empty");
    assert_eq!(body["forms"], Value::Array(Vec::new()));
    assert_eq!(h.store.backend().applied_writes(), 0);
}

#[tokio::test]
async fn at_gate_flow_09_visitor_submission_redirects_and_is_listed() {
    let h = harness(DeploymentVariant::MultiTenant, "a@x.com");
    let cookie = log_in(&h, "alice").await;
    let (id, cookie) = create_form(&h, &cookie, "Signup").await;

    let resp = send(
        &h,
        post_form(&format!("/s/{id}"), "email=v%40x.com&plan=pro&plan=free", None),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "https://example.com/thanks");

    let body = json(send(&h, get(&format!("/dashboard/{id}"), Some(&cookie))).await).await;
    assert_eq!(body["fields"], serde_json::json!(["email", "plan"]));
    assert_eq!(body["entries"][0]["fields"]["email"], "v@x.com");
    assert_eq!(body["entries"][0]["fields"]["plan"], "pro");

    let resp = send(&h, post_form("/s/deadbeef", "a=1", None)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let wrong_type = request(Method::POST, &format!("/s/{id}"), None)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    assert_eq!(send(&h, wrong_type).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn at_gate_flow_10_other_owners_cannot_see_or_change_a_form() {
    let h = harness(DeploymentVariant::MultiTenant, "a@x.com,b@x.com");
    let alice = log_in(&h, "alice").await;
    let bob = log_in(&h, "bob").await;
    let (id, _) = create_form(&h, &alice, "Private").await;

    let resp = send(&h, get(&format!("/dashboard/{id}"), Some(&bob))).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = send(
        &h,
        post_form(
            &format!("/dashboard/{id}"),
            "formName=Hijacked&redirectURL=https%3A%2F%2Fevil.test%2F",
            Some(&bob),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "/dashboard/");
    let bob = session_cookie(&resp).unwrap();
    let body = json(send(&h, get("/dashboard/", Some(&bob))).await).await;
    assert_eq!(body["messages"][0]["text"], "You don't have access to this form");

    let form = h
        .store
        .get_form(&FormId::new(id).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(form.name, "Private");
}

#[tokio::test]
async fn at_gate_flow_11_owner_updates_and_deletes() {
    let h = harness(DeploymentVariant::MultiTenant, "a@x.com");
    let cookie = log_in(&h, "alice").await;
    let (id, cookie) = create_form(&h, &cookie, "Draft").await;

    let resp = send(
        &h,
        post_form(
            &format!("/dashboard/{id}"),
            "formName=Final&redirectURL=https%3A%2F%2Fexample.com%2Fdone",
            Some(&cookie),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = session_cookie(&resp).unwrap();
    let body = json(resp).await;
    assert_eq!(body["form"]["name"], "Final");
    assert_eq!(body["form"]["redirect_url"], "https://example.com/done");
    assert!(body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m["type"] == "info" && m["text"] == "Form updated"));

    let delete = request(Method::DELETE, &format!("/dashboard/{id}"), Some(&cookie))
        .body(Body::empty())
        .unwrap();
    let resp = send(&h, delete).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = session_cookie(&resp).unwrap();
    assert_eq!(json(resp).await["status"], "ok");

    let body = json(send(&h, get("/dashboard/", Some(&cookie))).await).await;
    assert_eq!(body["forms"], Value::Array(Vec::new()));
    assert_eq!(body["messages"][0]["text"], "Form deleted");
}

#[tokio::test]
async fn at_gate_flow_12_tampered_cookie_is_anonymous() {
    let h = harness(DeploymentVariant::MultiTenant, "a@x.com");
    let cookie = log_in(&h, "alice").await;
    let tampered = format!("{cookie}x");

    let resp = send(&h, get("/dashboard/", Some(&tampered))).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert!(location(&resp).starts_with("https://idp.test/auth"));
    assert!(set_cookie(&resp).unwrap().contains("Max-Age=0"));
}

#[tokio::test]
async fn at_gate_flow_13_logout_expires_the_cookie() {
    let h = harness(DeploymentVariant::MultiTenant, "a@x.com");
    let cookie = log_in(&h, "alice").await;

    let resp = send(&h, get("/logout", Some(&cookie))).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "/");
    assert!(set_cookie(&resp).unwrap().contains("Max-Age=0"));
}

#[tokio::test]
async fn at_gate_flow_14_backend_outage_is_a_server_error() {
    let h = harness(DeploymentVariant::MultiTenant, "a@x.com");
    let cookie = log_in(&h, "alice").await;
    assert_eq!(send(&h, get("/healthz", None)).await.status(), StatusCode::OK);

    h.store.backend().set_unavailable(true);
    let resp = send(&h, get("/dashboard/", Some(&cookie))).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json(resp).await["reason"], "internal error");
    assert_eq!(
        send(&h, get("/healthz", None)).await.status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[tokio::test]
async fn at_gate_flow_15_single_tenant_admin_cannot_edit_over_http() {
    let h = harness(DeploymentVariant::SingleTenant, "a@x.com");
    let cookie = log_in(&h, "alice").await;
    let (id, cookie) = create_form(&h, &cookie, "Admin").await;
    assert_eq!(id.len(), 16);

    let resp = send(&h, get(&format!("/dashboard/{id}"), Some(&cookie))).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(
        &h,
        post_form(
            &format!("/dashboard/{id}"),
            "formName=Renamed&redirectURL=x",
            Some(&cookie),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn at_gate_flow_16_redirect_url_with_control_characters_is_refused() {
    let h = harness(DeploymentVariant::MultiTenant, "a@x.com");
    let cookie = log_in(&h, "alice").await;

    let resp = send(
        &h,
        post_form(
            "/dashboard/",
            "formName=Broken&redirectURL=https%3A%2F%2Fa.test%2F%0Anext",
            Some(&cookie),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["messages"][0]["type"], "warning");
    assert_eq!(
        body["messages"][0]["text"],
        "Redirect URL can't contain control characters"
    );
    assert_eq!(h.store.backend().applied_writes(), 0);

    // A record written before the check existed must not take a submission it cannot answer.
    let id = FormId::new("0badf00d").unwrap();
    let mut batch = WriteBatch::new();
    batch.hash_set(
        h.store.layout().keyspace.form(&id),
        vec![
            ("ID".to_string(), id.as_str().to_string()),
            ("Name".to_string(), "Legacy".to_string()),
            ("RedirectURL".to_string(), "https://a.test/\nnext".to_string()),
        ],
    );
    h.store.backend().checkout().unwrap().apply(batch).unwrap();
    let before = h.store.backend().applied_writes();

    let resp = send(&h, post_form("/s/0badf00d", "email=v%40x.com", None)).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(h.store.backend().applied_writes(), before);
    assert!(h.store.list_entries(&id).unwrap().is_empty());
}
