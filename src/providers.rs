//! Per-upstream credential providers
//!
//! Each upstream gets its own provider implementing the same small capability
//! set: mint an app-level token, refresh the app or user token, and validate
//! a held token against the provider's introspection endpoint. The grant
//! shapes and token lifetimes differ enough between the two upstreams that a
//! single generic OAuth client would hide the quirks that matter.

use crate::braids::{AccessToken, AccessTokenRef, ClientIdRef, RefreshToken};
use aliri_clock::DurationSecs;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub mod chat;
pub mod dto;
pub mod music;

pub use chat::ChatProvider;
pub use music::MusicProvider;

/// A freshly minted or refreshed credential as granted by an upstream
#[derive(Debug)]
pub struct TokenGrant {
    /// The bearer token to use for authenticated calls
    pub access_token: AccessToken,
    /// The remaining validity reported by the upstream, when it reports one
    pub lifetime: Option<DurationSecs>,
    /// A rotated refresh token, when the upstream issued one
    pub refresh_token: Option<RefreshToken>,
}

/// An error raised while exercising an upstream OAuth flow
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A required secret was absent from the environment
    #[error("{provider} provider is missing required configuration: {field}")]
    MissingConfig {
        /// The provider whose operation was short-circuited
        provider: &'static str,
        /// The absent configuration value
        field: &'static str,
    },

    /// The upstream returned a non-success status
    #[error("{provider} endpoint returned {status}: {body}")]
    Upstream {
        /// The provider that rejected the request
        provider: &'static str,
        /// The response status
        status: reqwest::StatusCode,
        /// The response body, for the logs
        body: String,
    },

    /// The request could not be sent
    #[error("error sending request to {provider}")]
    RequestSend {
        /// The provider being contacted
        provider: &'static str,
        /// The transport failure
        #[source]
        source: reqwest::Error,
    },

    /// The response body could not be read
    #[error("error reading response body from {provider}")]
    BodyRead {
        /// The provider being contacted
        provider: &'static str,
        /// The transport failure
        #[source]
        source: reqwest::Error,
    },

    /// The response body did not parse as a token response
    #[error("malformed token response from {provider}")]
    MalformedBody {
        /// The provider being contacted
        provider: &'static str,
        /// The deserialization failure
        #[source]
        source: serde_json::Error,
    },
}

impl ProviderError {
    /// Whether this failure is a missing environment secret rather than an
    /// upstream problem
    pub fn is_missing_config(&self) -> bool {
        matches!(self, ProviderError::MissingConfig { .. })
    }
}

/// The OAuth endpoints of one upstream
#[derive(Clone, Debug)]
pub struct ProviderEndpoints {
    /// The token mint/refresh endpoint
    pub token_url: reqwest::Url,
    /// The token introspection endpoint
    pub validate_url: reqwest::Url,
}

/// The capability set every upstream provider implements
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A short stable name for logs and store keys
    fn name(&self) -> &'static str;

    /// The configured client ID, if present in the environment
    fn client_id(&self) -> Option<&ClientIdRef>;

    /// Whether a refresh token is currently held
    fn has_refresh_token(&self) -> bool;

    /// Replaces the held refresh token with one rotated by the upstream
    fn adopt_refresh_token(&self, token: RefreshToken);

    /// Mints a fresh app-level token via the client-credentials grant
    async fn mint_app_token(&self) -> Result<TokenGrant, ProviderError>;

    /// Refreshes the app-level token via the refresh-token grant
    async fn refresh_app_token(&self) -> Result<TokenGrant, ProviderError>;

    /// Refreshes the user-level token via the refresh-token grant
    async fn refresh_user_token(&self) -> Result<TokenGrant, ProviderError>;

    /// Reports how much longer `token` remains valid upstream
    async fn validate(&self, token: &AccessTokenRef) -> Result<DurationSecs, ProviderError>;
}

#[tracing::instrument(
    err,
    skip(http, grant, token_url),
    fields(token_url = %token_url),
)]
pub(crate) async fn post_token_request<G: Serialize>(
    http: &reqwest::Client,
    provider: &'static str,
    token_url: &reqwest::Url,
    grant_type: &'static str,
    grant: &G,
) -> Result<TokenGrant, ProviderError> {
    tracing::trace!("requesting token from upstream");

    let resp = http
        .post(token_url.clone())
        .form(grant)
        .send()
        .await
        .map_err(|source| ProviderError::RequestSend { provider, source })?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received token response from upstream"
    );

    let status = resp.status();
    if !status.is_success() {
        let body = resp
            .text()
            .await
            .map_err(|source| ProviderError::BodyRead { provider, source })?;
        return Err(ProviderError::Upstream {
            provider,
            status,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(|source| ProviderError::BodyRead { provider, source })?;
    let parsed: dto::TokenResponse =
        serde_json::from_slice(&body).map_err(|source| ProviderError::MalformedBody {
            provider,
            source,
        })?;

    tracing::info!(
        token_type = parsed.token_type.as_deref().unwrap_or("bearer"),
        has_refresh_token = parsed.refresh_token.is_some(),
        lifetime = parsed.expires_in.map(|d| d.0).unwrap_or_default(),
        "received new token"
    );

    Ok(TokenGrant {
        access_token: parsed.access_token,
        lifetime: parsed.expires_in,
        refresh_token: parsed.refresh_token,
    })
}
