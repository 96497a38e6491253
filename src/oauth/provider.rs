//! OAuth proxy provider
//!
//! Authorization-server side of the proxy. Downstream clients register,
//! authorize and exchange codes here; user consent is delegated to the
//! upstream provider and the resulting upstream token is kept behind
//! proxy-issued tokens.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use subtle::ConstantTimeEq;
use tracing::{debug, info};
use url::Url;

use super::types::{
    AccessToken, AuthorizationCode, AuthorizationParams, OAuthToken, RefreshToken,
    RevocableToken, VerifiedAccess,
};
use super::upstream::UpstreamClient;
use crate::config::{Config, TokenLifetimes};
use crate::store::{
    AccessTokenRecord, AccessTokens, AuthCodes, AuthorizationCodeRecord, ClientMetadata, Clients,
    PendingAuth, PendingAuthorization, RefreshTokenRecord, RefreshTokens, RegisteredClient,
    TokenPair, TokenStore, UpstreamCredential, unix_now,
};
use crate::{Error, Result};

/// Upstream-facing settings of the provider
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Fixed callback URL registered with the upstream provider
    pub callback_url: String,
    /// Upstream authorization endpoint
    pub authorize_url: String,
    /// Proxy's client id at the upstream
    pub upstream_client_id: String,
    /// Space-separated upstream scopes; empty sends none
    pub scopes: String,
    /// Extra upstream authorize parameters
    pub extra_authorize_params: BTreeMap<String, String>,
    /// Lifetimes of issued artifacts
    pub lifetimes: TokenLifetimes,
}

impl ProviderSettings {
    /// Settings derived from the loaded configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            callback_url: config.callback_url(),
            authorize_url: config.upstream.authorize_url.clone(),
            upstream_client_id: config.upstream.client_id.clone(),
            scopes: config.upstream.scopes.clone(),
            extra_authorize_params: config.upstream.extra_authorize_params.clone(),
            lifetimes: config.tokens.clone(),
        }
    }
}

/// OAuth 2.0 AS proxy in front of a single upstream provider
pub struct OAuthProxyProvider {
    store: Arc<TokenStore>,
    settings: ProviderSettings,
    upstream: Arc<dyn UpstreamClient>,
}

impl OAuthProxyProvider {
    /// Create a provider over `store`, exchanging codes through `upstream`
    pub fn new(
        store: Arc<TokenStore>,
        settings: ProviderSettings,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            store,
            settings,
            upstream,
        }
    }

    /// Backing store
    #[must_use]
    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Look up a registered client
    pub fn get_client(&self, client_id: &str) -> Result<Option<RegisteredClient>> {
        self.store.get::<Clients>(client_id)
    }

    /// Dynamic client registration (RFC 7591).
    ///
    /// Metadata is stored as supplied, minus any keys that would shadow the
    /// server-assigned credentials. The secret never expires.
    pub fn register_client(&self, metadata: ClientMetadata) -> Result<RegisteredClient> {
        let client = RegisteredClient {
            client_id: generate_hex(16),
            client_secret: Some(generate_hex(32)),
            client_id_issued_at: unix_now(),
            client_secret_expires_at: 0,
            metadata: metadata.without_reserved_fields(),
        };
        self.store.put::<Clients>(&client.client_id, client.clone())?;

        info!(
            client_id = %client.client_id,
            client_name = client.metadata.client_name.as_deref().unwrap_or("-"),
            "Registered client"
        );
        Ok(client)
    }

    /// Start an authorization: remember the downstream request under a fresh
    /// state and return the upstream authorization URL to redirect to
    pub fn authorize(
        &self,
        client: &RegisteredClient,
        params: AuthorizationParams,
    ) -> Result<String> {
        let state = generate_token();
        let pending = PendingAuthorization {
            client_id: client.client_id.clone(),
            redirect_uri: params.redirect_uri,
            redirect_uri_provided_explicitly: params.redirect_uri_provided_explicitly,
            code_challenge: params.code_challenge,
            state: params.state,
            scopes: params.scopes,
            resource: params.resource,
            expires_at: expiry_after(self.settings.lifetimes.pending_auth_ttl_secs),
        };
        self.store.put::<PendingAuth>(&state, pending)?;

        let mut url = Url::parse(&self.settings.authorize_url)
            .map_err(|e| Error::Config(format!("upstream.authorize_url is invalid: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.settings.upstream_client_id)
                .append_pair("redirect_uri", &self.settings.callback_url)
                .append_pair("response_type", "code");
            if !self.settings.scopes.is_empty() {
                query.append_pair("scope", &self.settings.scopes);
            }
            for (key, value) in &self.settings.extra_authorize_params {
                query.append_pair(key, value);
            }
            query.append_pair("state", &state);
        }

        debug!(client_id = %client.client_id, "Redirecting to upstream authorization");
        Ok(url.into())
    }

    /// Complete the upstream leg of an authorization.
    ///
    /// Consumes the pending authorization for `state` (even if the upstream
    /// exchange then fails), exchanges `code` upstream, mints a proxy
    /// authorization code and returns the downstream redirect URL.
    pub async fn exchange_upstream_code(&self, code: &str, state: &str) -> Result<String> {
        let pending = self
            .store
            .take_if::<PendingAuth>(state, |_| true)?
            .ok_or(Error::NotFound)?;

        let grant = self
            .upstream
            .exchange_code(code, &self.settings.callback_url)
            .await?;

        let proxy_code = generate_token();
        let record = AuthorizationCodeRecord {
            upstream_token: grant.credential,
            client_id: pending.client_id.clone(),
            code_challenge: pending.code_challenge,
            redirect_uri: pending.redirect_uri.clone(),
            redirect_uri_provided_explicitly: pending.redirect_uri_provided_explicitly,
            scopes: pending.scopes,
            resource: pending.resource,
            identity: grant.identity,
            expires_at: expiry_after(self.settings.lifetimes.auth_code_ttl_secs),
        };
        self.store.put::<AuthCodes>(&proxy_code, record)?;

        info!(client_id = %pending.client_id, "Issued authorization code");
        Ok(redirect_with_code(
            &pending.redirect_uri,
            &proxy_code,
            pending.state.as_deref(),
        ))
    }

    /// Load a proxy authorization code issued to `client`.
    ///
    /// The returned `code_challenge` must be verified by the caller against
    /// the client's `code_verifier` before [`Self::exchange_authorization_code`].
    pub fn load_authorization_code(
        &self,
        client: &RegisteredClient,
        code: &str,
    ) -> Result<Option<AuthorizationCode>> {
        Ok(self
            .store
            .get::<AuthCodes>(code)?
            .filter(|record| same_client(&record.client_id, &client.client_id))
            .map(|record| AuthorizationCode::from_record(code, record)))
    }

    /// Redeem an authorization code for an access/refresh pair. Single use.
    pub fn exchange_authorization_code(
        &self,
        client: &RegisteredClient,
        code: &AuthorizationCode,
    ) -> Result<OAuthToken> {
        let record = self
            .store
            .take_if::<AuthCodes>(&code.code, |record| {
                same_client(&record.client_id, &client.client_id)
            })?
            .ok_or(Error::NotFound)?;

        let pair = self.mint_pair(
            &client.client_id,
            record.upstream_token,
            record.scopes,
            record.resource,
            record.identity,
        );
        let token = self.token_response(&pair);
        self.store.insert_pair(pair)?;

        info!(client_id = %client.client_id, "Issued access token");
        Ok(token)
    }

    /// Verify a bearer token and hand back its upstream credential
    pub fn load_access_token(&self, token: &str) -> Result<Option<VerifiedAccess>> {
        Ok(self
            .store
            .get::<AccessTokens>(token)?
            .map(|record| VerifiedAccess {
                token: AccessToken::from_record(token, &record),
                upstream: record.upstream_token,
            }))
    }

    /// Load a refresh token issued to `client`
    pub fn load_refresh_token(
        &self,
        client: &RegisteredClient,
        token: &str,
    ) -> Result<Option<RefreshToken>> {
        Ok(self
            .store
            .get::<RefreshTokens>(token)?
            .filter(|record| same_client(&record.client_id, &client.client_id))
            .map(|record| RefreshToken::from_record(token, &record)))
    }

    /// Rotate a refresh token into a new access/refresh pair.
    ///
    /// Empty `scopes` keeps the original grant; otherwise they must be a
    /// subset of it. The presented pair is unusable once this returns.
    pub fn exchange_refresh_token(
        &self,
        client: &RegisteredClient,
        refresh_token: &RefreshToken,
        scopes: &[String],
    ) -> Result<OAuthToken> {
        let record = self
            .store
            .get::<RefreshTokens>(&refresh_token.token)?
            .filter(|record| same_client(&record.client_id, &client.client_id))
            .ok_or(Error::NotFound)?;

        let scopes = if scopes.is_empty() {
            record.scopes.clone()
        } else {
            if let Some(extra) = scopes.iter().find(|s| !record.scopes.contains(*s)) {
                return Err(Error::InvalidScope(extra.clone()));
            }
            scopes.to_vec()
        };

        let pair = self.mint_pair(
            &client.client_id,
            record.upstream_token,
            scopes,
            record.resource,
            record.identity,
        );
        let token = self.token_response(&pair);
        self.store
            .rotate(Some(&record.access_token), &refresh_token.token, pair)?;

        Ok(token)
    }

    /// Revoke a token together with its pair (RFC 7009)
    pub fn revoke_token(&self, token: RevocableToken) -> Result<()> {
        let revoked = match &token {
            RevocableToken::Access(access) => self.store.revoke_access(&access.token)?,
            RevocableToken::Refresh(refresh) => self.store.revoke_refresh(&refresh.token)?,
        };
        if revoked {
            info!("Revoked token pair");
        } else {
            debug!("Revocation of unknown token ignored");
        }
        Ok(())
    }

    fn mint_pair(
        &self,
        client_id: &str,
        upstream_token: UpstreamCredential,
        scopes: Vec<String>,
        resource: Option<String>,
        identity: Option<String>,
    ) -> TokenPair {
        let now = unix_now();
        let lifetimes = &self.settings.lifetimes;
        let access_token = generate_token();
        let refresh_token = generate_token();

        TokenPair {
            access: AccessTokenRecord {
                upstream_token: upstream_token.clone(),
                client_id: client_id.to_string(),
                scopes: scopes.clone(),
                expires_at: now.saturating_add(lifetimes.access_token_ttl_secs),
                refresh_token: refresh_token.clone(),
                resource: resource.clone(),
                identity: identity.clone(),
            },
            refresh: RefreshTokenRecord {
                upstream_token,
                client_id: client_id.to_string(),
                scopes,
                access_token: access_token.clone(),
                resource,
                identity,
                expires_at: (lifetimes.refresh_token_ttl_secs > 0)
                    .then(|| now.saturating_add(lifetimes.refresh_token_ttl_secs)),
            },
            access_token,
            refresh_token,
        }
    }

    fn token_response(&self, pair: &TokenPair) -> OAuthToken {
        let scopes = &pair.access.scopes;
        OAuthToken {
            access_token: pair.access_token.clone(),
            token_type: "Bearer".to_string(),
            expires_in: self.settings.lifetimes.access_token_ttl_secs,
            refresh_token: pair.refresh_token.clone(),
            scope: (!scopes.is_empty()).then(|| scopes.join(" ")),
        }
    }
}

fn expiry_after(ttl_secs: u64) -> u64 {
    unix_now().saturating_add(ttl_secs)
}

/// 32 random bytes, URL-safe base64 without padding
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

fn generate_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill(bytes.as_mut_slice());
    hex::encode(bytes)
}

fn same_client(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Append `code` (and `state`, if any) to the downstream redirect URI
fn redirect_with_code(redirect_uri: &str, code: &str, state: Option<&str>) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("code", code);
    if let Some(state) = state {
        query.append_pair("state", state);
    }
    let separator = if redirect_uri.contains('?') { '&' } else { '?' };
    format!("{redirect_uri}{separator}{}", query.finish())
}
