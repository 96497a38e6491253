//! Method-aware access gate
//!
//! Decides per request whether bearer verification is needed before the
//! request reaches protected handlers. A `GET` that carries the transport's
//! session header rides on a session established by an earlier, verified
//! request and passes straight through. Everything else must present a
//! bearer token the [`TokenVerifier`] accepts.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::error::oauth_codes;
use crate::oauth::{AccessToken, OAuthProxyProvider, VerifiedAccess};
use crate::store::UpstreamCredential;
use crate::{Error, Result};

/// Resolves bearer tokens to verified access
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// `Ok(None)` for unknown or expired tokens
    async fn verify(&self, token: &str) -> Result<Option<VerifiedAccess>>;
}

#[async_trait]
impl TokenVerifier for OAuthProxyProvider {
    async fn verify(&self, token: &str) -> Result<Option<VerifiedAccess>> {
        self.load_access_token(token)
    }
}

/// Outcome of classifying a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Session-bound read; no bearer check
    SessionValidated,
    /// Bearer token must be verified
    BearerRequired,
}

/// Request classification by method and session header
#[derive(Debug, Clone)]
pub struct MethodPolicy {
    session_header: HeaderName,
}

impl MethodPolicy {
    /// Policy keyed on `session_header` (e.g. `mcp-session-id`)
    pub fn new(session_header: &str) -> Result<Self> {
        let session_header = HeaderName::try_from(session_header)
            .map_err(|e| Error::Config(format!("Invalid session header '{session_header}': {e}")))?;
        Ok(Self { session_header })
    }

    /// Only a `GET` carrying the session header skips bearer verification
    #[must_use]
    pub fn classify(&self, method: &Method, headers: &HeaderMap) -> GateDecision {
        if *method == Method::GET && headers.contains_key(&self.session_header) {
            GateDecision::SessionValidated
        } else {
            GateDecision::BearerRequired
        }
    }
}

impl Default for MethodPolicy {
    fn default() -> Self {
        Self {
            session_header: HeaderName::from_static("mcp-session-id"),
        }
    }
}

/// Verified caller identity for protected handlers.
///
/// Present in request extensions whenever the gate checked a bearer token;
/// session-validated reads carry none.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The verified proxy token
    pub access: AccessToken,
    /// Upstream credential for calls on the user's behalf
    pub upstream: UpstreamCredential,
}

impl RequestContext {
    /// Upstream user label, when the upstream named one
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.access.identity.as_deref()
    }
}

impl From<VerifiedAccess> for RequestContext {
    fn from(verified: VerifiedAccess) -> Self {
        Self {
            access: verified.token,
            upstream: verified.upstream,
        }
    }
}

/// Gate state shared by the middleware
pub struct AccessGate {
    policy: MethodPolicy,
    verifier: Arc<dyn TokenVerifier>,
}

impl AccessGate {
    /// Gate applying `policy`, verifying bearers with `verifier`
    pub fn new(policy: MethodPolicy, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { policy, verifier }
    }
}

/// Access gate middleware
pub async fn gate_middleware(
    State(gate): State<Arc<AccessGate>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if gate.policy.classify(request.method(), request.headers()) == GateDecision::SessionValidated {
        debug!(path = %request.uri().path(), "Session-bound GET, skipping bearer check");
        return next.run(request).await;
    }

    let Some(token) = bearer_token(request.headers()) else {
        warn!(method = %request.method(), path = %request.uri().path(), "Missing bearer token");
        return unauthorized_response("Missing bearer token");
    };

    match gate.verifier.verify(token).await {
        Ok(Some(verified)) => {
            debug!(client_id = %verified.token.client_id, "Bearer token verified");
            request
                .extensions_mut()
                .insert(RequestContext::from(verified));
            next.run(request).await
        }
        Ok(None) => {
            warn!(path = %request.uri().path(), "Rejected unknown or expired bearer token");
            unauthorized_response("Invalid or expired token")
        }
        Err(e) => {
            error!(error = %e, "Token verification failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": oauth_codes::SERVER_ERROR,
                    "error_description": "Token verification failed"
                })),
            )
                .into_response()
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|t| !t.is_empty())
}

/// 401 with an RFC 6750 challenge
fn unauthorized_response(description: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, r#"Bearer error="invalid_token""#)],
        Json(json!({
            "error": oauth_codes::INVALID_TOKEN,
            "error_description": description
        })),
    )
        .into_response()
}
