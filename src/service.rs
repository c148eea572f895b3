//! The secret service
//!
//! Reconciles the expiring store against the credentials the process needs:
//! missing or expired entries are re-minted through the matching provider and
//! written back with a conservative TTL, both at startup and on a recurring
//! background timer. All outbound authenticated calls read their headers
//! through this one seam.
//!
//! Per credential the lifecycle is absent → cached → needs-refresh. Expiry is
//! implicit (the store stops returning the entry); a caller observing a 401
//! signals needs-refresh explicitly through [`SecretService::force_refresh`],
//! which treats the cached value as revoked. Two concurrent refreshes of the
//! same credential are tolerated: both upstream calls are accepted by the
//! providers, the store write is last-write-wins, and every subsequent reader
//! sees one intact value.

use crate::braids::{AccessToken, RefreshToken};
use crate::providers::{CredentialProvider, ProviderError, TokenGrant};
use crate::records::TtlPolicy;
use crate::store::{ExpiringStore, StoreError};
use aliri_clock::DurationSecs;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Store key for the chat app-level token
pub const CHAT_APP_TOKEN: &str = "chat-app-token";
/// Store key for the chat user-level token
pub const CHAT_USER_TOKEN: &str = "chat-user-token";
/// Store key for the music user token
pub const MUSIC_TOKEN: &str = "music-token";

/// Lifetime the upstream documents for refresh tokens; used when persisting
/// a rotated refresh token, which carries no `expires_in` of its own
const REFRESH_TOKEN_TTL: DurationSecs = DurationSecs(61 * 86_400);

/// Default period of the background renewal timer
const DEFAULT_RENEWAL_INTERVAL: Duration = Duration::from_secs(300);

/// Identifies which credential an operation concerns
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthScope {
    /// Server-to-server calls on the chat platform
    ChatApp,
    /// Privileged calls carrying the channel owner's permissions
    ChatUser,
    /// Calls to the music platform
    Music,
}

impl AuthScope {
    /// Every credential the service is responsible for
    pub const ALL: [AuthScope; 3] = [AuthScope::ChatApp, AuthScope::ChatUser, AuthScope::Music];

    /// The store key this credential lives under
    pub fn credential_name(self) -> &'static str {
        match self {
            AuthScope::ChatApp => CHAT_APP_TOKEN,
            AuthScope::ChatUser => CHAT_USER_TOKEN,
            AuthScope::Music => MUSIC_TOKEN,
        }
    }

    /// The provider-documented token lifetime, used when a grant omits
    /// `expires_in`
    pub fn documented_lifetime(self) -> DurationSecs {
        match self {
            AuthScope::ChatApp => DurationSecs(4 * 3600),
            AuthScope::ChatUser => DurationSecs(61 * 86_400),
            AuthScope::Music => DurationSecs(3600),
        }
    }

    fn is_chat(self) -> bool {
        matches!(self, AuthScope::ChatApp | AuthScope::ChatUser)
    }
}

/// An error raised by the secret service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A credential needed to build headers is unavailable
    #[error("missing credential: {name}")]
    MissingCredential {
        /// Which credential was needed
        name: &'static str,
    },

    /// The matching provider failed to mint or refresh
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The store rejected a write
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A credential produced bytes that are not a valid header value
    #[error("credential produced an invalid header value")]
    InvalidHeader(#[from] header::InvalidHeaderValue),
}

/// Orchestrates credential acquisition, caching, and renewal
pub struct SecretService {
    store: Arc<dyn ExpiringStore>,
    chat: Arc<dyn CredentialProvider>,
    music: Arc<dyn CredentialProvider>,
    ttl_policy: TtlPolicy,
    renewal_interval: Duration,
}

impl fmt::Debug for SecretService {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SecretService")
            .field("providers", &[self.chat.name(), self.music.name()])
            .field("ttl_policy", &self.ttl_policy)
            .field("renewal_interval", &self.renewal_interval)
            .finish()
    }
}

impl SecretService {
    /// Constructs the service over an already-connected store and the two
    /// providers
    pub fn new(
        store: Arc<dyn ExpiringStore>,
        chat: Arc<dyn CredentialProvider>,
        music: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            store,
            chat,
            music,
            ttl_policy: TtlPolicy::default(),
            renewal_interval: DEFAULT_RENEWAL_INTERVAL,
        }
    }

    /// Replaces the TTL policy
    pub fn with_ttl_policy(mut self, ttl_policy: TtlPolicy) -> Self {
        self.ttl_policy = ttl_policy;
        self
    }

    /// Replaces the background renewal period
    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = interval;
        self
    }

    fn provider_for(&self, scope: AuthScope) -> &Arc<dyn CredentialProvider> {
        if scope.is_chat() {
            &self.chat
        } else {
            &self.music
        }
    }

    /// Provisions every required credential that is missing from the store
    ///
    /// Failures are logged per credential and do not abort the others:
    /// partial availability at startup is preferred over refusing to start,
    /// since a missing credential will be retried reactively on first use.
    pub async fn init_secrets(&self) {
        self.adopt_persisted_refresh_tokens().await;
        for scope in AuthScope::ALL {
            match self.ensure_credential(scope).await {
                Ok(()) => {}
                Err(error) => tracing::warn!(
                    credential = scope.credential_name(),
                    error = (&error as &dyn error::Error),
                    "failed to provision credential at startup"
                ),
            }
        }
    }

    /// Spawns the background renewal task
    ///
    /// Reconciles all credentials once per interval until `shutdown` flips to
    /// `true` or its sender is dropped. Cancellation is observed before the
    /// next tick is taken, so no new reconciliation starts afterwards.
    pub fn start_background_renewal(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.renewal_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        match changed {
                            Ok(()) if !*shutdown.borrow_and_update() => continue,
                            _ => {
                                tracing::info!("background credential renewal stopping");
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => service.reconcile().await,
                }
            }
        })
    }

    async fn reconcile(&self) {
        for scope in AuthScope::ALL {
            if let Err(error) = self.ensure_credential(scope).await {
                tracing::warn!(
                    credential = scope.credential_name(),
                    error = (&error as &dyn error::Error),
                    "scheduled credential renewal failed"
                );
            }
        }
    }

    async fn ensure_credential(&self, scope: AuthScope) -> Result<(), ServiceError> {
        if self.cached_value(scope).await.is_some() {
            tracing::trace!(credential = scope.credential_name(), "credential still cached");
            return Ok(());
        }
        self.force_refresh(scope).await.map(drop)
    }

    /// Reads the cached credential, treating store errors as a miss
    async fn cached_value(&self, scope: AuthScope) -> Option<String> {
        match self.store.get(scope.credential_name()).await {
            Ok(Some(value)) if !value.is_empty() => Some(value),
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(
                    credential = scope.credential_name(),
                    error = (&error as &dyn error::Error),
                    "store read failed, treating as cache miss"
                );
                None
            }
        }
    }

    /// Returns the current valid token for `scope`, minting one on a miss
    pub async fn current_token(&self, scope: AuthScope) -> Result<AccessToken, ServiceError> {
        if let Some(value) = self.cached_value(scope).await {
            return Ok(AccessToken::from(value));
        }
        self.force_refresh(scope).await
    }

    /// Bypasses the cache check: always calls the provider and overwrites
    /// the store entry
    ///
    /// The cached entry is deleted first (treat-as-revoked), so a failed
    /// refresh cannot leave a token the upstream already rejected.
    pub async fn force_refresh(&self, scope: AuthScope) -> Result<AccessToken, ServiceError> {
        let name = scope.credential_name();
        if let Err(error) = self.store.delete(name).await {
            tracing::warn!(
                credential = name,
                error = (&error as &dyn error::Error),
                "could not delete revoked credential"
            );
        }

        let grant = self.grant_for(scope).await?;
        let TokenGrant {
            access_token,
            lifetime,
            refresh_token,
        } = grant;

        if let Some(rotated) = refresh_token {
            self.persist_rotated_refresh_token(scope, rotated).await;
        }

        let reported = lifetime.unwrap_or_else(|| scope.documented_lifetime());
        match self.ttl_policy.storage_ttl(reported) {
            Some(ttl) => {
                self.store.set(name, access_token.as_str(), ttl).await?;
                tracing::info!(credential = name, ttl = ttl.0, "credential refreshed");
            }
            None => tracing::warn!(
                credential = name,
                "upstream granted a zero-lifetime token, not caching it"
            ),
        }
        Ok(access_token)
    }

    /// Forces a refresh of the chat app-level token
    pub async fn force_refresh_app_token(&self) -> Result<AccessToken, ServiceError> {
        self.force_refresh(AuthScope::ChatApp).await
    }

    /// Forces a refresh of the chat user-level token
    pub async fn force_refresh_user_token(&self) -> Result<AccessToken, ServiceError> {
        self.force_refresh(AuthScope::ChatUser).await
    }

    /// Forces a refresh of the music token
    pub async fn force_refresh_music_token(&self) -> Result<AccessToken, ServiceError> {
        self.force_refresh(AuthScope::Music).await
    }

    async fn grant_for(&self, scope: AuthScope) -> Result<TokenGrant, ProviderError> {
        match scope {
            AuthScope::ChatApp => {
                if self.chat.has_refresh_token() {
                    self.chat.refresh_app_token().await
                } else {
                    self.chat.mint_app_token().await
                }
            }
            AuthScope::ChatUser => self.chat.refresh_user_token().await,
            AuthScope::Music => {
                if self.music.has_refresh_token() {
                    self.music.refresh_user_token().await
                } else {
                    self.music.mint_app_token().await
                }
            }
        }
    }

    /// Seeds providers with refresh tokens rotated in an earlier process life
    async fn adopt_persisted_refresh_tokens(&self) {
        for provider in [&self.chat, &self.music] {
            let key = format!("{}-refresh-token", provider.name());
            match self.store.get(&key).await {
                Ok(Some(value)) => {
                    provider.adopt_refresh_token(RefreshToken::from(value));
                    tracing::info!(key = %key, "adopted persisted refresh token");
                }
                Ok(None) => {}
                Err(error) => tracing::warn!(
                    key = %key,
                    error = (&error as &dyn error::Error),
                    "could not read persisted refresh token"
                ),
            }
        }
    }

    /// Persists an upstream-rotated refresh token so the next process life
    /// does not start from a stale environment seed
    async fn persist_rotated_refresh_token(&self, scope: AuthScope, rotated: RefreshToken) {
        let provider = self.provider_for(scope);
        let key = format!("{}-refresh-token", provider.name());
        if let Err(error) = self
            .store
            .set(&key, rotated.as_str(), REFRESH_TOKEN_TTL)
            .await
        {
            tracing::warn!(
                key = %key,
                error = (&error as &dyn error::Error),
                "could not persist rotated refresh token"
            );
        }
        provider.adopt_refresh_token(rotated);
    }

    /// Builds the header set for server-to-server chat calls
    ///
    /// This is the single read path every outbound authenticated call uses.
    pub async fn build_auth_headers(&self) -> Result<HeaderMap, ServiceError> {
        self.build_auth_headers_for(AuthScope::ChatApp).await
    }

    /// Builds the header set for calls under the given scope
    ///
    /// Never returns a header map with an empty bearer token: an unset
    /// client ID or an unobtainable token surfaces as `MissingCredential`.
    pub async fn build_auth_headers_for(
        &self,
        scope: AuthScope,
    ) -> Result<HeaderMap, ServiceError> {
        let mut headers = HeaderMap::new();

        if scope.is_chat() {
            let client_id = self
                .chat
                .client_id()
                .ok_or(ServiceError::MissingCredential {
                    name: "chat client id",
                })?;
            headers.insert(
                HeaderName::from_static("client-id"),
                HeaderValue::from_str(client_id.as_str())?,
            );
        }

        let token = self.current_token(scope).await.map_err(|error| match error {
            ServiceError::Provider(inner) if inner.is_missing_config() => {
                ServiceError::MissingCredential {
                    name: scope.credential_name(),
                }
            }
            other => other,
        })?;
        if token.as_str().is_empty() {
            return Err(ServiceError::MissingCredential {
                name: scope.credential_name(),
            });
        }

        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))?;
        value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, value);
        Ok(headers)
    }

    /// Asks the provider how much longer the cached credential remains valid
    ///
    /// Reads only the cache; a missing entry is `MissingCredential`, never a
    /// fresh mint.
    pub async fn validate_current(&self, scope: AuthScope) -> Result<DurationSecs, ServiceError> {
        let Some(value) = self.cached_value(scope).await else {
            return Err(ServiceError::MissingCredential {
                name: scope.credential_name(),
            });
        };
        let token = AccessToken::from(value);
        Ok(self.provider_for(scope).validate(&token).await?)
    }
}
