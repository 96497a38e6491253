//! HTTP surface tests: access gate, callback route and health
//!
//! Routers are driven in-process with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Extension, Json, Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;

use mcp_remote_auth::config::Config;
use mcp_remote_auth::gateway::{ProxyServer, RequestContext, whoami};
use mcp_remote_auth::oauth::{
    AuthorizationParams, OAuthProxyProvider, OAuthToken, ProviderSettings, UpstreamClient,
    UpstreamGrant,
};
use mcp_remote_auth::store::{ClientMetadata, TokenStore, UpstreamCredential};
use mcp_remote_auth::{Error, Result};

struct FakeUpstream;

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<UpstreamGrant> {
        assert_eq!(redirect_uri, "https://proxy.example.com/oauth/callback");
        if code == "rejected" {
            return Err(Error::UpstreamExchange);
        }
        Ok(UpstreamGrant {
            credential: UpstreamCredential::new(format!("ntn_{code}")),
            identity: Some("Ada Lovelace (Acme)".to_string()),
        })
    }
}

async fn echo(context: Option<Extension<RequestContext>>) -> impl IntoResponse {
    Json(match context {
        Some(Extension(ctx)) => json!({
            "client_id": ctx.access.client_id,
            "upstream": ctx.upstream.expose(),
            "identity": ctx.identity(),
        }),
        None => json!({ "client_id": null }),
    })
}

struct Harness {
    _dir: tempfile::TempDir,
    provider: Arc<OAuthProxyProvider>,
    app: Router,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.server.base_url = "https://proxy.example.com".to_string();
    config.upstream.authorize_url = "https://api.notion.com/v1/oauth/authorize".to_string();
    config.upstream.client_id = "upstream-id".to_string();

    let store = Arc::new(TokenStore::open(dir.path(), "secret").unwrap());
    let provider = Arc::new(OAuthProxyProvider::new(
        store,
        ProviderSettings::from_config(&config),
        Arc::new(FakeUpstream),
    ));
    let protected = Router::new()
        .route("/mcp", get(echo).post(echo).delete(echo))
        .route("/whoami", get(whoami));
    let app = ProxyServer::new(config, provider.clone(), protected)
        .router()
        .unwrap();

    Harness {
        _dir: dir,
        provider,
        app,
    }
}

fn params() -> AuthorizationParams {
    AuthorizationParams {
        state: Some("downstream-state".to_string()),
        scopes: vec![],
        code_challenge: "challenge".to_string(),
        redirect_uri: "https://claude.ai/api/mcp/auth_callback".to_string(),
        redirect_uri_provided_explicitly: true,
        resource: None,
    }
}

fn query_param(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Start an authorization and return the proxy state sent upstream
fn start_authorization(provider: &OAuthProxyProvider) -> String {
    let client = provider.register_client(ClientMetadata::default()).unwrap();
    let url = provider.authorize(&client, params()).unwrap();
    query_param(&url, "state").unwrap()
}

async fn issue_token(provider: &OAuthProxyProvider) -> OAuthToken {
    let client = provider.register_client(ClientMetadata::default()).unwrap();
    let state = query_param(&provider.authorize(&client, params()).unwrap(), "state").unwrap();
    let redirect = provider.exchange_upstream_code("abc", &state).await.unwrap();
    let code = query_param(&redirect, "code").unwrap();
    let loaded = provider
        .load_authorization_code(&client, &code)
        .unwrap()
        .unwrap();
    provider.exchange_authorization_code(&client, &loaded).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, header::HeaderMap, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8_lossy(&body).into_owned())
}

fn request(method: Method, uri: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(uri)
}

#[tokio::test]
async fn health_is_public() {
    let h = harness();
    let (status, _, body) = send(&h.app, request(Method::GET, "/health").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn post_without_token_is_rejected() {
    let h = harness();
    let (status, headers, body) =
        send(&h.app, request(Method::POST, "/mcp").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        headers.get(header::WWW_AUTHENTICATE).unwrap(),
        r#"Bearer error="invalid_token""#
    );
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn post_with_session_header_still_needs_token() {
    let h = harness();
    let req = request(Method::POST, "/mcp")
        .header("mcp-session-id", "s-1")
        .body(Body::empty())
        .unwrap();

    let (status, _, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn delete_with_session_header_still_needs_token() {
    let h = harness();
    let req = request(Method::DELETE, "/mcp")
        .header("mcp-session-id", "s-1")
        .body(Body::empty())
        .unwrap();

    let (status, _, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn get_with_session_header_bypasses_bearer() {
    let h = harness();
    let req = request(Method::GET, "/mcp")
        .header("mcp-session-id", "s-1")
        .body(Body::empty())
        .unwrap();

    let (status, _, body) = send(&h.app, req).await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["client_id"], Value::Null);
}

#[tokio::test]
async fn get_without_session_header_needs_token() {
    let h = harness();
    let (status, _, _) = send(&h.app, request(Method::GET, "/mcp").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn valid_token_reaches_handler_with_context() {
    // GIVEN: a token issued through the full flow
    let h = harness();
    let token = issue_token(&h.provider).await;

    // WHEN: a protected POST presents it
    let req = request(Method::POST, "/mcp")
        .header(header::AUTHORIZATION, format!("Bearer {}", token.access_token))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&h.app, req).await;

    // THEN: the handler sees the upstream credential for this request
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["upstream"], "ntn_abc");
    assert_eq!(body["identity"], "Ada Lovelace (Acme)");
    assert!(body["client_id"].is_string());
}

#[tokio::test]
async fn bearer_scheme_case_is_ignored() {
    let h = harness();
    let token = issue_token(&h.provider).await;

    let req = request(Method::POST, "/mcp")
        .header(header::AUTHORIZATION, format!("BEARER {}", token.access_token))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&h.app, req).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn whoami_reports_verified_token_and_identity() {
    // GIVEN: a token issued for a labelled upstream user
    let h = harness();
    let token = issue_token(&h.provider).await;

    // WHEN: the diagnostic endpoint is called with it
    let req = request(Method::GET, "/whoami")
        .header(header::AUTHORIZATION, format!("Bearer {}", token.access_token))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&h.app, req).await;

    // THEN: it describes the token without leaking either credential
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["identity"], "Ada Lovelace (Acme)");
    assert!(body["expires_at"].is_u64());
    assert!(!body.to_string().contains(&token.access_token));
    assert!(!body.to_string().contains("ntn_abc"));
}

#[tokio::test]
async fn whoami_on_session_read_is_unauthenticated() {
    let h = harness();
    let req = request(Method::GET, "/whoami")
        .header("mcp-session-id", "s-1")
        .body(Body::empty())
        .unwrap();

    let (status, _, body) = send(&h.app, req).await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["authenticated"], false);
}

#[tokio::test]
async fn unknown_token_is_rejected() {
    let h = harness();
    let req = request(Method::POST, "/mcp")
        .header(header::AUTHORIZATION, "Bearer not-a-real-token")
        .body(Body::empty())
        .unwrap();

    let (status, _, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn callback_success_redirects_to_client() {
    let h = harness();
    let state = start_authorization(&h.provider);

    let uri = format!("/oauth/callback?code=abc&state={state}");
    let (status, headers, _) = send(&h.app, request(Method::GET, &uri).body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::SEE_OTHER);
    let location = headers.get(header::LOCATION).unwrap().to_str().unwrap();
    assert!(location.starts_with("https://claude.ai/api/mcp/auth_callback?code="));
    assert_eq!(query_param(location, "state").as_deref(), Some("downstream-state"));
}

#[tokio::test]
async fn callback_with_upstream_error_does_not_exchange() {
    let h = harness();
    let state = start_authorization(&h.provider);

    let uri = format!("/oauth/callback?error=access_denied&error_description=User+declined&state={state}");
    let (status, _, body) = send(&h.app, request(Method::GET, &uri).body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("User declined"));
    assert_eq!(h.provider.store().stats().auth_codes, 0);
}

#[tokio::test]
async fn callback_missing_parameters() {
    let h = harness();
    let (status, _, _) = send(
        &h.app,
        request(Method::GET, "/oauth/callback?code=abc").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn callback_unknown_state() {
    let h = harness();
    let (status, _, body) = send(
        &h.app,
        request(Method::GET, "/oauth/callback?code=abc&state=forged")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("invalid_state"));
}

#[tokio::test]
async fn callback_upstream_failure_is_bad_gateway() {
    let h = harness();
    let state = start_authorization(&h.provider);

    let uri = format!("/oauth/callback?code=rejected&state={state}");
    let (status, _, body) = send(&h.app, request(Method::GET, &uri).body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(!body.contains("rejected"));
}

#[tokio::test]
async fn callback_state_is_single_use() {
    let h = harness();
    let state = start_authorization(&h.provider);
    let uri = format!("/oauth/callback?code=abc&state={state}");

    let (first, _, _) = send(&h.app, request(Method::GET, &uri).body(Body::empty()).unwrap()).await;
    let (second, _, _) = send(&h.app, request(Method::GET, &uri).body(Body::empty()).unwrap()).await;

    assert_eq!(first, StatusCode::SEE_OTHER);
    assert_eq!(second, StatusCode::BAD_REQUEST);
}
