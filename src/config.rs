//! Configuration management

use std::{
    collections::BTreeMap,
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::oauth::CALLBACK_PATH;
use crate::{Error, Result};

/// Prefix for environment overrides, e.g. `MCP_REMOTE_AUTH_STORAGE__SECRET`
pub const ENV_PREFIX: &str = "MCP_REMOTE_AUTH_";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving `env:` references.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Token store configuration
    pub storage: StorageConfig,
    /// Upstream OAuth provider
    pub upstream: UpstreamConfig,
    /// Lifetimes of issued artifacts
    pub tokens: TokenLifetimes,
    /// Access gate configuration
    pub gate: GateConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::from_figment(&figment)
    }

    /// Extract from a prepared figment, then load env files and resolve
    /// `env:` references
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.resolve_secrets();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    fn resolve_secrets(&mut self) {
        self.storage.secret = resolve_secret(&self.storage.secret);
        self.upstream.client_id = resolve_secret(&self.upstream.client_id);
        self.upstream.client_secret = resolve_secret(&self.upstream.client_secret);
    }

    /// Check that everything needed to run the proxy is present
    pub fn validate(&self) -> Result<()> {
        if self.storage.secret.is_empty() {
            return Err(Error::Config("storage.secret is required".to_string()));
        }
        if self.upstream.client_id.is_empty() || self.upstream.client_secret.is_empty() {
            return Err(Error::Config(
                "upstream.client_id and upstream.client_secret are required".to_string(),
            ));
        }
        for (name, value) in [
            ("upstream.authorize_url", &self.upstream.authorize_url),
            ("upstream.token_url", &self.upstream.token_url),
            ("server.base_url", &self.server.base_url),
        ] {
            Url::parse(value).map_err(|e| Error::Config(format!("{name} is invalid: {e}")))?;
        }
        self.tokens.validate()?;
        if let Some(pointer) = self
            .upstream
            .identity_fields
            .iter()
            .find(|p| !p.starts_with('/'))
        {
            return Err(Error::Config(format!(
                "upstream.identity_fields entry {pointer:?} must be a JSON pointer starting with '/'"
            )));
        }
        Ok(())
    }

    /// The fixed callback URL registered with the upstream provider
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}{CALLBACK_PATH}", self.server.base_url.trim_end_matches('/'))
    }
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Resolve a secret value: literal, or `env:VAR_NAME`.
///
/// An unset variable resolves to an empty string so validation can reject it.
#[must_use]
pub fn resolve_secret(value: &str) -> String {
    match value.strip_prefix("env:") {
        Some(var_name) => env::var(var_name).unwrap_or_else(|_| {
            tracing::warn!(var = %var_name, "Referenced environment variable is not set");
            String::new()
        }),
        None => value.to_string(),
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Externally reachable base URL (used to build the callback URL)
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            base_url: "http://127.0.0.1:8000".to_string(),
        }
    }
}

/// Token store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the encrypted snapshot
    pub data_dir: PathBuf,
    /// Secret the snapshot key is derived from.
    /// Supports literal value or `env:VAR_NAME`. Changing it discards all state.
    pub secret: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            secret: "env:SESSION_SECRET".to_string(),
        }
    }
}

/// How the upstream token request body is encoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenRequestFormat {
    /// JSON body (e.g. Notion)
    #[default]
    Json,
    /// `application/x-www-form-urlencoded` body (RFC 6749)
    Form,
}

/// Upstream OAuth provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Display name used in logs and error pages
    pub provider_name: String,
    /// Upstream authorization endpoint
    pub authorize_url: String,
    /// Upstream token endpoint
    pub token_url: String,
    /// This proxy's client id at the upstream (supports `env:VAR_NAME`)
    pub client_id: String,
    /// This proxy's client secret at the upstream (supports `env:VAR_NAME`)
    pub client_secret: String,
    /// Space-separated scopes requested upstream (empty = none sent)
    pub scopes: String,
    /// Extra query parameters for the upstream authorize URL
    pub extra_authorize_params: BTreeMap<String, String>,
    /// Token request body encoding
    pub token_request_format: TokenRequestFormat,
    /// Field of the token response holding the access token
    pub token_field: String,
    /// Timeout for the upstream token request (seconds)
    pub timeout_secs: u64,
    /// JSON pointers into the token response naming the upstream user,
    /// e.g. `/owner/user/name` then `/workspace_name`. Empty disables labels.
    pub identity_fields: Vec<String>,
}

impl UpstreamConfig {
    /// Upstream request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            provider_name: "upstream".to_string(),
            authorize_url: String::new(),
            token_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scopes: String::new(),
            extra_authorize_params: BTreeMap::new(),
            token_request_format: TokenRequestFormat::default(),
            token_field: "access_token".to_string(),
            timeout_secs: 30,
            identity_fields: Vec::new(),
        }
    }
}

/// Lifetimes of proxy-issued artifacts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenLifetimes {
    /// Pending authorization (authorize → callback)
    pub pending_auth_ttl_secs: u64,
    /// Proxy authorization code
    pub auth_code_ttl_secs: u64,
    /// Access token
    pub access_token_ttl_secs: u64,
    /// Refresh token; `0` means refresh tokens never expire
    pub refresh_token_ttl_secs: u64,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            pending_auth_ttl_secs: 600,
            auth_code_ttl_secs: 300,
            access_token_ttl_secs: 86_400,
            refresh_token_ttl_secs: 30 * 86_400,
        }
    }
}

impl TokenLifetimes {
    /// Longest accepted lifetime: ten years
    pub const MAX_TTL_SECS: u64 = 10 * 365 * 86_400;

    /// Every lifetime must be positive and at most [`Self::MAX_TTL_SECS`],
    /// except the refresh lifetime, where `0` means no expiry
    pub fn validate(&self) -> Result<()> {
        for (name, ttl, zero_allowed) in [
            ("tokens.pending_auth_ttl_secs", self.pending_auth_ttl_secs, false),
            ("tokens.auth_code_ttl_secs", self.auth_code_ttl_secs, false),
            ("tokens.access_token_ttl_secs", self.access_token_ttl_secs, false),
            ("tokens.refresh_token_ttl_secs", self.refresh_token_ttl_secs, true),
        ] {
            if ttl == 0 && !zero_allowed {
                return Err(Error::Config(format!("{name} must be positive")));
            }
            if ttl > Self::MAX_TTL_SECS {
                return Err(Error::Config(format!(
                    "{name} must not exceed {} seconds",
                    Self::MAX_TTL_SECS
                )));
            }
        }
        Ok(())
    }
}

/// Access gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Header carrying the transport's negotiated session id
    pub session_header: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            session_header: "mcp-session-id".to_string(),
        }
    }
}
