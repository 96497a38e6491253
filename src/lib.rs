//! MCP Remote Auth
//!
//! OAuth 2.0 authorization server proxy for remote MCP servers. Downstream
//! clients get standards-compliant registration, authorization and token
//! endpoints backed by this crate, while user consent is delegated to a
//! single upstream provider whose token never leaves the proxy.
//!
//! # Components
//!
//! - **Token store**: encrypted, crash-safe persistence of clients, pending
//!   authorizations, codes and token pairs ([`store`])
//! - **Proxy provider**: the OAuth state machine on top of the store
//!   ([`oauth`])
//! - **Access gate**: method-aware bearer verification in front of protected
//!   routes ([`gateway`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod oauth;
pub mod store;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
    }

    Ok(())
}
