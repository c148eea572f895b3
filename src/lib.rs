//! Background management of platform credentials and the requests they sign
//!
//! This library keeps the OAuth2 tokens a chat-facing service needs alive
//! without the rest of the service having to think about them. Tokens live in
//! an expiring key-value store under well-known names and simply disappear
//! when their conservative TTL runs out; a [`SecretService`] re-mints missing
//! entries through per-upstream [providers](providers), both reactively on
//! first use and proactively from a background renewal task.
//!
//! Outbound calls go through a [`Dispatcher`], which attaches the credential
//! headers for the request's scope and owns the revocation policy: a 401 from
//! an upstream forces one refresh and one replay, and nothing more.
//!
//! # General flow
//!
//! On start-up, connect a store, build the providers from environment-seeded
//! [settings](config::Settings), and let the service provision whatever it
//! can:
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokenward::config::Settings;
//! use tokenward::providers::{ChatProvider, MusicProvider, ProviderEndpoints};
//! use tokenward::store::RedisStore;
//! use tokenward::{default_http_client, Dispatcher, SecretService};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::from_env();
//! let store = RedisStore::connect(settings.cache_addr.as_deref().unwrap_or("redis://127.0.0.1"))
//!     .await?;
//!
//! let http = default_http_client()?;
//! let chat_endpoints = ProviderEndpoints {
//!     token_url: "https://id.chat.example/oauth2/token".parse()?,
//!     validate_url: "https://id.chat.example/oauth2/validate".parse()?,
//! };
//! let music_endpoints = ProviderEndpoints {
//!     token_url: "https://accounts.music.example/api/token".parse()?,
//!     validate_url: "https://accounts.music.example/api/validate".parse()?,
//! };
//!
//! let service = Arc::new(SecretService::new(
//!     Arc::new(store),
//!     Arc::new(ChatProvider::new(http.clone(), chat_endpoints, settings.chat)),
//!     Arc::new(MusicProvider::new(http.clone(), music_endpoints, settings.music)),
//! ));
//! service.init_secrets().await;
//!
//! let (shutdown, watch) = tokio::sync::watch::channel(false);
//! let renewal = service.start_background_renewal(watch);
//!
//! let dispatcher = Dispatcher::new(http, Arc::clone(&service));
//! // ... serve traffic through `dispatcher` ...
//!
//! shutdown.send(true)?;
//! renewal.await?;
//! # Ok(())
//! # }
//! ```
//!
//! Tokens never appear in logs: the secret-bearing types render redacted
//! through both `Debug` and `Display`.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod config;
pub mod dispatch;
pub mod providers;
mod records;
pub mod service;
pub mod store;
pub mod subscriptions;

pub use braids::{
    AccessToken, AccessTokenRef, AdminToken, AdminTokenRef, ClientId, ClientIdRef, ClientSecret,
    ClientSecretRef, RefreshToken, RefreshTokenRef,
};
pub use dispatch::{default_http_client, DispatchError, Dispatcher, RequestEnvelope};
pub use records::{SecretRecord, TtlPolicy};
pub use service::{AuthScope, SecretService, ServiceError};
