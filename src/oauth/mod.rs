//! OAuth 2.0 authorization server proxy
//!
//! Presents an AS to downstream clients while acting as an OAuth client of a
//! single upstream provider:
//! - Dynamic client registration (RFC 7591)
//! - Authorization redirects to the upstream provider
//! - Upstream code exchange behind a proxy authorization code
//! - Access/refresh token issuance with rotation
//! - Revocation of token pairs (RFC 7009)

mod callback;
mod provider;
mod types;
mod upstream;

/// Path of the upstream redirect target
pub const CALLBACK_PATH: &str = "/oauth/callback";

pub use callback::{CallbackParams, callback_router};
pub use provider::{OAuthProxyProvider, ProviderSettings};
pub use types::{
    AccessToken, AuthorizationCode, AuthorizationParams, OAuthToken, RefreshToken,
    RevocableToken, VerifiedAccess,
};
pub use upstream::{HttpUpstreamClient, UpstreamClient, UpstreamGrant, identity_label};
