//! Values exchanged with the AS front end

use serde::{Deserialize, Serialize};

use crate::store::{AccessTokenRecord, AuthorizationCodeRecord, RefreshTokenRecord, UpstreamCredential};

/// Parameters of a downstream `/authorize` request, already validated by
/// the front end
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthorizationParams {
    /// Downstream `state`, echoed back on the final redirect
    #[serde(default)]
    pub state: Option<String>,
    /// Requested scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// PKCE challenge
    pub code_challenge: String,
    /// Downstream redirect URI
    pub redirect_uri: String,
    /// Whether `redirect_uri` was present on the request
    #[serde(default)]
    pub redirect_uri_provided_explicitly: bool,
    /// RFC 8707 resource indicator
    #[serde(default)]
    pub resource: Option<String>,
}

/// A proxy authorization code as seen by the front end.
///
/// The upstream credential stays inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationCode {
    /// Code value
    pub code: String,
    /// Client the code was issued to
    pub client_id: String,
    /// PKCE challenge for the front end to verify against `code_verifier`
    pub code_challenge: String,
    /// Redirect URI the code was delivered to
    pub redirect_uri: String,
    /// Whether the client sent `redirect_uri` explicitly
    pub redirect_uri_provided_explicitly: bool,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Resource indicator
    pub resource: Option<String>,
    /// Unix seconds
    pub expires_at: u64,
}

impl AuthorizationCode {
    pub(crate) fn from_record(code: &str, record: AuthorizationCodeRecord) -> Self {
        Self {
            code: code.to_string(),
            client_id: record.client_id,
            code_challenge: record.code_challenge,
            redirect_uri: record.redirect_uri,
            redirect_uri_provided_explicitly: record.redirect_uri_provided_explicitly,
            scopes: record.scopes,
            resource: record.resource,
            expires_at: record.expires_at,
        }
    }
}

/// A proxy access token as seen by the front end
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessToken {
    /// Token value
    #[serde(skip)]
    pub token: String,
    /// Owning client
    pub client_id: String,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Unix seconds
    pub expires_at: u64,
    /// Resource indicator
    pub resource: Option<String>,
    /// Upstream user label captured at authorization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

impl AccessToken {
    pub(crate) fn from_record(token: &str, record: &AccessTokenRecord) -> Self {
        Self {
            token: token.to_string(),
            client_id: record.client_id.clone(),
            scopes: record.scopes.clone(),
            expires_at: record.expires_at,
            resource: record.resource.clone(),
            identity: record.identity.clone(),
        }
    }
}

/// A proxy refresh token as seen by the front end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    /// Token value
    pub token: String,
    /// Owning client
    pub client_id: String,
    /// Scopes of the original grant
    pub scopes: Vec<String>,
    /// Unix seconds; `None` never expires
    pub expires_at: Option<u64>,
}

impl RefreshToken {
    pub(crate) fn from_record(token: &str, record: &RefreshTokenRecord) -> Self {
        Self {
            token: token.to_string(),
            client_id: record.client_id.clone(),
            scopes: record.scopes.clone(),
            expires_at: record.expires_at,
        }
    }
}

/// Token endpoint response body (RFC 6749 §5.1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    /// Access token
    pub access_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// Refresh token
    pub refresh_token: String,
    /// Space-separated scopes, omitted when none were granted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// A token named in a revocation request (RFC 7009)
#[derive(Debug, Clone)]
pub enum RevocableToken {
    /// Revoke by access token
    Access(AccessToken),
    /// Revoke by refresh token
    Refresh(RefreshToken),
}

/// Result of a successful bearer verification.
///
/// Hands the upstream credential to the request that presented the token
/// and to nothing else.
#[derive(Debug, Clone)]
pub struct VerifiedAccess {
    /// The verified proxy token
    pub token: AccessToken,
    /// Upstream credential it maps to
    pub upstream: UpstreamCredential,
}
