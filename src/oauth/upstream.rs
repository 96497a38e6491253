//! Client side of the upstream provider: authorization code exchange

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{TokenRequestFormat, UpstreamConfig};
use crate::store::UpstreamCredential;
use crate::{Error, Result};

/// What a successful upstream code exchange yields
#[derive(Debug, Clone)]
pub struct UpstreamGrant {
    /// Upstream access token
    pub credential: UpstreamCredential,
    /// Human-readable label of the upstream user, if the response names one
    pub identity: Option<String>,
}

impl UpstreamGrant {
    /// Grant without an identity label
    #[must_use]
    pub fn anonymous(credential: UpstreamCredential) -> Self {
        Self {
            credential,
            identity: None,
        }
    }
}

/// Exchanges an upstream authorization code for an upstream access token
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Exchange `code`, obtained at `redirect_uri`, for an upstream grant.
    ///
    /// Any failure is reported as [`Error::UpstreamExchange`]; details are
    /// logged, never returned.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<UpstreamGrant>;
}

/// [`UpstreamClient`] speaking OAuth 2.0 over HTTP with Basic client auth
pub struct HttpUpstreamClient {
    http: reqwest::Client,
    provider_name: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    format: TokenRequestFormat,
    token_field: String,
    identity_fields: Vec<String>,
}

impl HttpUpstreamClient {
    /// Build from upstream configuration; the configured timeout bounds
    /// every request
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            provider_name: config.provider_name.clone(),
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            format: config.token_request_format,
            token_field: config.token_field.clone(),
            identity_fields: config.identity_fields.clone(),
        })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<UpstreamGrant> {
        let request = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret));

        let request = match self.format {
            TokenRequestFormat::Json => request.json(&serde_json::json!({
                "grant_type": "authorization_code",
                "code": code,
                "redirect_uri": redirect_uri,
            })),
            TokenRequestFormat::Form => request.form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ]),
        };

        let response = request.send().await.map_err(|e| {
            warn!(provider = %self.provider_name, error = %e, "Upstream token request failed");
            Error::UpstreamExchange
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                provider = %self.provider_name,
                status = %status,
                body = %body,
                "Upstream rejected code exchange"
            );
            return Err(Error::UpstreamExchange);
        }

        let body: Value = response.json().await.map_err(|e| {
            warn!(provider = %self.provider_name, error = %e, "Upstream token response is not JSON");
            Error::UpstreamExchange
        })?;

        let token = body
            .get(&self.token_field)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                warn!(
                    provider = %self.provider_name,
                    field = %self.token_field,
                    "Upstream token response lacks access token"
                );
                Error::UpstreamExchange
            })?;

        let identity = identity_label(&body, &self.identity_fields);
        debug!(
            provider = %self.provider_name,
            has_identity = identity.is_some(),
            "Upstream code exchange succeeded"
        );
        Ok(UpstreamGrant {
            credential: UpstreamCredential::new(token),
            identity,
        })
    }
}

/// Build a user label from JSON pointers into the token response.
///
/// The first non-empty string found is the label; any further ones are
/// appended in parentheses, e.g. `Ada Lovelace (Acme)`.
#[must_use]
pub fn identity_label(body: &Value, pointers: &[String]) -> Option<String> {
    let mut found = pointers
        .iter()
        .filter_map(|pointer| body.pointer(pointer))
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let primary = found.next()?;
    let rest: Vec<&str> = found.collect();
    if rest.is_empty() {
        Some(primary.to_string())
    } else {
        Some(format!("{primary} ({})", rest.join(", ")))
    }
}
