//! The music platform credential provider
//!
//! The music upstream hands out short-lived (about an hour) user tokens via
//! the refresh-token grant and does not require the client secret on refresh
//! when one was bound at authorization time. Its refresh tokens do not
//! normally rotate, but a rotated token is surfaced just in case.

use super::dto::{ClientCredentialsGrant, RefreshGrant, ValidationResponse};
use super::{post_token_request, CredentialProvider, ProviderEndpoints, ProviderError, TokenGrant};
use crate::braids::{AccessTokenRef, ClientId, ClientIdRef, ClientSecret, ClientSecretRef, RefreshToken};
use crate::config::MusicSettings;
use aliri_clock::DurationSecs;
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};

const PROVIDER: &str = "music";

/// Credential provider for the music platform
#[derive(Debug)]
pub struct MusicProvider {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
    client_id: Option<ClientId>,
    client_secret: Option<ClientSecret>,
    refresh_token: Mutex<Option<RefreshToken>>,
}

impl MusicProvider {
    /// Constructs the provider from its endpoints and environment-seeded
    /// secret bundle
    pub fn new(
        http: reqwest::Client,
        endpoints: ProviderEndpoints,
        settings: MusicSettings,
    ) -> Self {
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

    fn secret(&self) -> Option<&ClientSecretRef> {
        self.client_secret.as_deref()
    }
}

#[async_trait]
impl CredentialProvider for MusicProvider {
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
            client_secret: self.secret().ok_or(ProviderError::MissingConfig {
                provider: PROVIDER,
                field: "client secret",
            })?,
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
        // the music upstream has no separate app-level grant; app and user
        // refreshes exchange the same token
        self.refresh_user_token().await
    }

    async fn refresh_user_token(&self) -> Result<TokenGrant, ProviderError> {
        let refresh_token = self.refresh_slot().clone().ok_or(ProviderError::MissingConfig {
            provider: PROVIDER,
            field: "refresh token",
        })?;
        let grant = RefreshGrant {
            client_id: self.require_client_id()?,
            client_secret: self.secret(),
            refresh_token: &refresh_token,
        };
        post_token_request(&self.http, PROVIDER, &self.endpoints.token_url, "refresh_token", &grant)
            .await
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

        tracing::debug!(remaining = parsed.expires_in.0, "validated music token");
        Ok(parsed.expires_in)
    }
}
