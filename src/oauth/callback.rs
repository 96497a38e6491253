//! Upstream redirect target
//!
//! The upstream provider sends the user's browser here after consent. The
//! handler finishes the upstream leg and bounces the browser back to the
//! downstream client with a proxy authorization code.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::{debug, warn};

use super::CALLBACK_PATH;
use super::provider::OAuthProxyProvider;
use crate::Error;

/// Upstream callback query parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Upstream authorization code
    pub code: Option<String>,

    /// Proxy state issued at authorize time
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// Router serving [`CALLBACK_PATH`]
pub fn callback_router(provider: Arc<OAuthProxyProvider>) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(handle_callback))
        .with_state(provider)
}

/// Handle the upstream callback
async fn handle_callback(
    State(provider): State<Arc<OAuthProxyProvider>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if let Some(error) = params.error {
        let description = params
            .error_description
            .unwrap_or_else(|| "Authorization was not granted".to_string());
        debug!(error = %error, "Upstream returned an authorization error");
        return failure(StatusCode::BAD_REQUEST, &error, &description);
    }

    let (Some(code), Some(state)) = (params.code, params.state) else {
        return failure(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Missing code or state parameter",
        );
    };

    match provider.exchange_upstream_code(&code, &state).await {
        Ok(redirect) => Redirect::to(&redirect).into_response(),
        Err(Error::NotFound) => failure(
            StatusCode::BAD_REQUEST,
            "invalid_state",
            "Unknown or expired authorization state",
        ),
        Err(e) => {
            warn!(error = %e, "Callback could not complete authorization");
            failure(
                e.status_code(),
                e.oauth_error_code(),
                "Authorization could not be completed. Please try again.",
            )
        }
    }
}

fn failure(status: StatusCode, error: &str, description: &str) -> Response {
    (status, Html(error_page(error, description))).into_response()
}

fn error_page(error: &str, description: &str) -> String {
    let error = escape_html(error);
    let description = escape_html(description);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Authorization Failed</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 4rem auto; max-width: 32rem; }}
        .error-code {{ font-family: monospace; opacity: 0.7; }}
    </style>
</head>
<body>
    <h1>Authorization Failed</h1>
    <p>{description}</p>
    <p class="error-code">Error: {error}</p>
</body>
</html>"#
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
