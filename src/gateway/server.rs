//! Proxy HTTP server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Extension, Json, Router, middleware, response::IntoResponse, routing::get};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::auth::{AccessGate, MethodPolicy, RequestContext, gate_middleware};
use crate::config::Config;
use crate::oauth::{OAuthProxyProvider, callback_router};
use crate::{Error, Result};

/// Assemble the application router.
///
/// `/health` and the upstream callback are public; every route of
/// `protected` sits behind the access gate.
pub fn create_router(
    provider: Arc<OAuthProxyProvider>,
    gate: Arc<AccessGate>,
    protected: Router,
) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .merge(callback_router(provider))
        .merge(protected.layer(middleware::from_fn_with_state(gate, gate_middleware)))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Diagnostic handler describing the caller as the gate saw it
pub async fn whoami(context: Option<Extension<RequestContext>>) -> impl IntoResponse {
    match context {
        Some(Extension(ctx)) => Json(json!({
            "authenticated": true,
            "client_id": ctx.access.client_id,
            "scopes": ctx.access.scopes,
            "expires_at": ctx.access.expires_at,
            "resource": ctx.access.resource,
            "identity": ctx.access.identity,
        })),
        None => Json(json!({ "authenticated": false, "session": true })),
    }
}

/// OAuth proxy server
pub struct ProxyServer {
    config: Config,
    provider: Arc<OAuthProxyProvider>,
    protected: Router,
}

impl ProxyServer {
    /// Create a server exposing `protected` behind the gate
    pub fn new(config: Config, provider: Arc<OAuthProxyProvider>, protected: Router) -> Self {
        Self {
            config,
            provider,
            protected,
        }
    }

    /// Build the full router with the provider as bearer verifier
    pub fn router(&self) -> Result<Router> {
        let policy = MethodPolicy::new(&self.config.gate.session_header)?;
        let gate = Arc::new(AccessGate::new(policy, self.provider.clone()));
        Ok(create_router(
            self.provider.clone(),
            gate,
            self.protected.clone(),
        ))
    }

    /// Serve until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );
        let app = self.router()?;

        let listener = TcpListener::bind(addr).await?;
        info!(
            addr = %addr,
            base_url = %self.config.server.base_url,
            store = %self.provider.store().path().display(),
            "OAuth proxy listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("OAuth proxy stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
