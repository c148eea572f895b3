//! The chat platform credential provider
//!
//! App-level tokens come from the client-credentials grant and live for a
//! few hours; user-level tokens come from the refresh-token grant, carry the
//! channel owner's permissions, and are the only tokens allowed to perform
//! privileged writes such as channel metadata updates. The refresh endpoint
//! may rotate the refresh token; rotated tokens are surfaced on the grant and
//! adopted back into the provider.

use super::dto::{ClientCredentialsGrant, RefreshGrant, ValidationResponse};
use super::{post_token_request, CredentialProvider, ProviderEndpoints, ProviderError, TokenGrant};
use crate::braids::{AccessTokenRef, ClientId, ClientIdRef, ClientSecret, ClientSecretRef, RefreshToken};
use crate::config::ChatSettings;
use aliri_clock::DurationSecs;
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};

const PROVIDER: &str = "chat";

/// Credential provider for the chat platform
#[derive(Debug)]
pub struct ChatProvider {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
    client_id: Option<ClientId>,
    client_secret: Option<ClientSecret>,
    refresh_token: Mutex<Option<RefreshToken>>,
}

impl ChatProvider {
    /// Constructs the provider from its endpoints and environment-seeded
    /// secret bundle
    pub fn new(http: reqwest::Client, endpoints: ProviderEndpoints, settings: ChatSettings) -> Self {
        Self {
            http,
            endpoints,
            client_id: settings.client_id,
            client_secret: settings.client_secret,
            refresh_token: Mutex::new(settings.refresh_token),
        }
    }

    fn refresh_slot(&self) -> MutexGuard<'_, Option<RefreshToken>> {
        self.refresh_token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_client_id(&self) -> Result<&ClientIdRef, ProviderError> {
        self.client_id.as_deref().ok_or(ProviderError::MissingConfig {
            provider: PROVIDER,
            field: "client id",
        })
    }

    fn require_client_secret(&self) -> Result<&ClientSecretRef, ProviderError> {
        self.client_secret.as_deref().ok_or(ProviderError::MissingConfig {
            provider: PROVIDER,
            field: "client secret",
        })
    }

    fn current_refresh_token(&self) -> Result<RefreshToken, ProviderError> {
        self.refresh_slot().clone().ok_or(ProviderError::MissingConfig {
            provider: PROVIDER,
            field: "refresh token",
        })
    }

    async fn exchange_refresh_token(&self) -> Result<TokenGrant, ProviderError> {
        let refresh_token = self.current_refresh_token()?;
        let grant = RefreshGrant {
            client_id: self.require_client_id()?,
            client_secret: Some(self.require_client_secret()?),
            refresh_token: &refresh_token,
        };
        post_token_request(&self.http, PROVIDER, &self.endpoints.token_url, "refresh_token", &grant)
            .await
    }
}

#[async_trait]
impl CredentialProvider for ChatProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn client_id(&self) -> Option<&ClientIdRef> {
        self.client_id.as_deref()
    }

    fn has_refresh_token(&self) -> bool {
        self.refresh_slot().is_some()
    }

    fn adopt_refresh_token(&self, token: RefreshToken) {
        *self.refresh_slot() = Some(token);
        tracing::debug!(provider = PROVIDER, "adopted rotated refresh token");
    }

    async fn mint_app_token(&self) -> Result<TokenGrant, ProviderError> {
        let grant = ClientCredentialsGrant {
            client_id: self.require_client_id()?,
            client_secret: self.require_client_secret()?,
        };
        post_token_request(
            &self.http,
            PROVIDER,
            &self.endpoints.token_url,
            "client_credentials",
            &grant,
        )
        .await
    }

    async fn refresh_app_token(&self) -> Result<TokenGrant, ProviderError> {
        tracing::debug!(provider = PROVIDER, "refreshing app token");
        self.exchange_refresh_token().await
    }

    async fn refresh_user_token(&self) -> Result<TokenGrant, ProviderError> {
        tracing::debug!(provider = PROVIDER, "refreshing user token");
        self.exchange_refresh_token().await
    }

    async fn validate(&self, token: &AccessTokenRef) -> Result<DurationSecs, ProviderError> {
        let resp = self
            .http
            .get(self.endpoints.validate_url.clone())
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(|source| ProviderError::RequestSend {
                provider: PROVIDER,
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.map_err(|source| ProviderError::BodyRead {
                provider: PROVIDER,
                source,
            })?;
            return Err(ProviderError::Upstream {
                provider: PROVIDER,
                status,
                body,
            });
        }

        let parsed: ValidationResponse =
            resp.json().await.map_err(|source| ProviderError::BodyRead {
                provider: PROVIDER,
                source,
            })?;

        tracing::debug!(
            remaining = parsed.expires_in.0,
            scopes = parsed.scopes.as_ref().map(Vec::len).unwrap_or_default(),
            client_id = parsed.client_id.as_ref().map(|c| c.as_str()).unwrap_or(""),
            "validated chat token"
        );
        Ok(parsed.expires_in)
    }
}
