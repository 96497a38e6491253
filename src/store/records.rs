//! Typed records persisted by the token store

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle to the upstream provider's access token.
///
/// `Debug` is redacted so records and contexts can be logged safely. Callers
/// that need the raw value (to build an upstream API client) use
/// [`UpstreamCredential::expose`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpstreamCredential(String);

impl UpstreamCredential {
    /// Wrap a raw upstream token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value, for building the upstream request
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UpstreamCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UpstreamCredential(***)")
    }
}

/// Client metadata supplied at dynamic registration (RFC 7591).
///
/// Trusted as-is; unknown fields are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientMetadata {
    /// Redirect URIs the client may use
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    /// Grant types the client will use
    #[serde(default)]
    pub grant_types: Vec<String>,

    /// Response types the client will use
    #[serde(default)]
    pub response_types: Vec<String>,

    /// Token endpoint authentication method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,

    /// Space-separated scope string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Any other registration fields
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Registration fields the proxy assigns itself. Client-supplied copies in
/// `extra` would serialize as duplicate keys and make the snapshot unreadable.
pub const RESERVED_CLIENT_FIELDS: [&str; 4] = [
    "client_id",
    "client_secret",
    "client_id_issued_at",
    "client_secret_expires_at",
];

impl ClientMetadata {
    /// Drop client-supplied values for [`RESERVED_CLIENT_FIELDS`]
    #[must_use]
    pub fn without_reserved_fields(mut self) -> Self {
        self.extra
            .retain(|key, _| !RESERVED_CLIENT_FIELDS.contains(&key.as_str()));
        self
    }
}

/// A dynamically registered downstream client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredClient {
    /// Client identifier
    pub client_id: String,

    /// Client secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Registration time (Unix seconds)
    pub client_id_issued_at: u64,

    /// Secret expiry (Unix seconds); `0` means the secret never expires
    #[serde(default)]
    pub client_secret_expires_at: u64,

    /// Registration metadata
    #[serde(flatten)]
    pub metadata: ClientMetadata,
}

/// An in-flight redirect to the upstream provider, keyed by proxy state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    /// Downstream client that started the flow
    pub client_id: String,
    /// Where to send the downstream client afterwards
    pub redirect_uri: String,
    /// Whether the client sent `redirect_uri` on the authorize request
    #[serde(default)]
    pub redirect_uri_provided_explicitly: bool,
    /// PKCE challenge from the downstream client
    pub code_challenge: String,
    /// Downstream `state`, echoed back verbatim
    #[serde(default)]
    pub state: Option<String>,
    /// Requested scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// RFC 8707 resource indicator
    #[serde(default)]
    pub resource: Option<String>,
    /// Unix seconds
    pub expires_at: u64,
}

/// A proxy-issued authorization code bound to an upstream token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationCodeRecord {
    /// Upstream token obtained at the callback
    pub upstream_token: UpstreamCredential,
    /// Client the code was issued to
    pub client_id: String,
    /// PKCE challenge carried from the authorize request
    pub code_challenge: String,
    /// Redirect URI the code was delivered to
    pub redirect_uri: String,
    /// Whether the client sent `redirect_uri` explicitly
    #[serde(default)]
    pub redirect_uri_provided_explicitly: bool,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Resource indicator
    #[serde(default)]
    pub resource: Option<String>,
    /// Upstream user label captured at the exchange
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Unix seconds
    pub expires_at: u64,
}

/// A proxy-issued access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    /// Upstream token this access token stands in for
    pub upstream_token: UpstreamCredential,
    /// Owning client
    pub client_id: String,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Unix seconds
    pub expires_at: u64,
    /// Paired refresh token
    pub refresh_token: String,
    /// Resource indicator
    #[serde(default)]
    pub resource: Option<String>,
    /// Upstream user label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

/// A proxy-issued refresh token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// Upstream token carried across rotations
    pub upstream_token: UpstreamCredential,
    /// Owning client
    pub client_id: String,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Paired access token
    pub access_token: String,
    /// Resource indicator
    #[serde(default)]
    pub resource: Option<String>,
    /// Upstream user label, carried across rotations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Unix seconds; `None` never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

/// An access/refresh pair written together
#[derive(Debug, Clone)]
pub struct TokenPair {
    /// Access token value
    pub access_token: String,
    /// Access token record
    pub access: AccessTokenRecord,
    /// Refresh token value
    pub refresh_token: String,
    /// Refresh token record
    pub refresh: RefreshTokenRecord,
}

/// The full persisted document: five keyed collections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collections {
    /// Registered clients by `client_id`
    #[serde(default)]
    pub clients: HashMap<String, RegisteredClient>,
    /// Pending authorizations by proxy state
    #[serde(default)]
    pub pending_auth: HashMap<String, PendingAuthorization>,
    /// Authorization codes by code value
    #[serde(default)]
    pub auth_codes: HashMap<String, AuthorizationCodeRecord>,
    /// Access tokens by token value
    #[serde(default)]
    pub access_tokens: HashMap<String, AccessTokenRecord>,
    /// Refresh tokens by token value
    #[serde(default)]
    pub refresh_tokens: HashMap<String, RefreshTokenRecord>,
}
