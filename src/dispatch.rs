//! Authenticated request dispatch
//!
//! Every outbound call to an upstream platform goes through the dispatcher,
//! which attaches the credential headers for the request's scope and owns the
//! one retry policy the upstreams need: a 401 means the bearer token has been
//! revoked ahead of its stored expiry, so the credential is force-refreshed
//! and the request replayed exactly once. A second 401 is surfaced as-is.

use crate::service::{AuthScope, SecretService, ServiceError};
use reqwest::header::HeaderMap;
use reqwest::{Method, Response, StatusCode, Url};
use std::error;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds the HTTP client every component is expected to share
///
/// Applies the standard 60 second timeout to all outbound calls; providers
/// and the dispatcher should be constructed over this client rather than a
/// bare `reqwest::Client::new()`.
pub fn default_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()
}

/// A request to an upstream platform, before credentials are attached
#[derive(Clone, Debug)]
pub struct RequestEnvelope {
    /// HTTP method
    pub method: Method,
    /// Fully-formed request URL, query included
    pub url: Url,
    /// Extra headers layered over the credential headers
    pub headers: HeaderMap,
    /// Optional JSON body
    pub body: Option<serde_json::Value>,
    /// Which credential authenticates this request
    pub scope: AuthScope,
}

impl RequestEnvelope {
    /// A GET request under the app-level chat credential
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// A POST request under the app-level chat credential
    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// A PATCH request under the app-level chat credential
    pub fn patch(url: Url) -> Self {
        Self::new(Method::PATCH, url)
    }

    /// A DELETE request under the app-level chat credential
    pub fn delete(url: Url) -> Self {
        Self::new(Method::DELETE, url)
    }

    fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            scope: AuthScope::ChatApp,
        }
    }

    /// Authenticates with the given credential instead of the chat app token
    pub fn with_scope(mut self, scope: AuthScope) -> Self {
        self.scope = scope;
        self
    }

    /// Attaches a JSON body
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds one header on top of the credential headers
    pub fn with_header(
        mut self,
        name: reqwest::header::HeaderName,
        value: reqwest::header::HeaderValue,
    ) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// An error raised while dispatching a request
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The upstream rejected the credential even after a forced refresh
    #[error("upstream rejected credentials ({status})")]
    Unauthorized {
        /// The rejecting status, 401 unless the refresh itself failed
        status: StatusCode,
        /// Why the forced refresh failed, when it did
        #[source]
        refresh_error: Option<ServiceError>,
    },

    /// The upstream answered with a non-success status unrelated to auth
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus {
        /// The response status
        status: StatusCode,
        /// The request URL
        url: Url,
    },

    /// The request could not be sent or its response read
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// Credential headers could not be built
    #[error(transparent)]
    Credentials(#[from] ServiceError),
}

/// Sends envelopes with credentials attached, retrying once on revocation
#[derive(Clone, Debug)]
pub struct Dispatcher {
    http: reqwest::Client,
    secrets: Arc<SecretService>,
}

impl Dispatcher {
    /// Constructs a dispatcher over an existing HTTP client
    pub fn new(http: reqwest::Client, secrets: Arc<SecretService>) -> Self {
        Self { http, secrets }
    }

    /// Constructs a dispatcher over the [default client](default_http_client)
    pub fn with_default_client(secrets: Arc<SecretService>) -> Result<Self, DispatchError> {
        Ok(Self::new(default_http_client()?, secrets))
    }

    /// Sends the envelope, refreshing and replaying once on a 401
    pub async fn send(&self, envelope: &RequestEnvelope) -> Result<Response, DispatchError> {
        let response = self.issue(envelope).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return self.refresh_and_retry(envelope, response.status()).await;
        }
        self.finish(envelope, response, false)
    }

    /// Like [`send`](Self::send), but disambiguates a 400 answer
    ///
    /// Some upstream write endpoints answer 400 both for a malformed payload
    /// and for an insufficient token. The held token is validated out of
    /// band: if it is still alive the 400 is a genuine payload error and is
    /// terminal; otherwise the credential is refreshed and the request
    /// replayed once, as for a 401.
    pub async fn send_with_auth_probe(
        &self,
        envelope: &RequestEnvelope,
    ) -> Result<Response, DispatchError> {
        let response = self.issue(envelope).await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return self.refresh_and_retry(envelope, status).await;
        }
        if status == StatusCode::BAD_REQUEST {
            match self.secrets.validate_current(envelope.scope).await {
                Ok(remaining) if remaining.0 > 0 => {
                    tracing::debug!(
                        url = %envelope.url,
                        remaining = remaining.0,
                        "token still valid, treating 400 as a payload error"
                    );
                }
                Ok(_) => return self.refresh_and_retry(envelope, status).await,
                Err(error) => {
                    tracing::debug!(
                        url = %envelope.url,
                        error = (&error as &dyn error::Error),
                        "could not validate held token, refreshing"
                    );
                    return self.refresh_and_retry(envelope, status).await;
                }
            }
        }
        self.finish(envelope, response, false)
    }

    async fn issue(&self, envelope: &RequestEnvelope) -> Result<Response, DispatchError> {
        let mut headers = self.secrets.build_auth_headers_for(envelope.scope).await?;
        headers.extend(envelope.headers.clone());

        let mut request = self
            .http
            .request(envelope.method.clone(), envelope.url.clone())
            .headers(headers);
        if let Some(body) = &envelope.body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn refresh_and_retry(
        &self,
        envelope: &RequestEnvelope,
        rejected_with: StatusCode,
    ) -> Result<Response, DispatchError> {
        tracing::info!(
            url = %envelope.url,
            status = rejected_with.as_u16(),
            credential = envelope.scope.credential_name(),
            "credentials rejected, refreshing and retrying once"
        );

        if let Err(refresh_error) = self.secrets.force_refresh(envelope.scope).await {
            return Err(DispatchError::Unauthorized {
                status: rejected_with,
                refresh_error: Some(refresh_error),
            });
        }

        let retried = self.issue(envelope).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            return Err(DispatchError::Unauthorized {
                status: retried.status(),
                refresh_error: None,
            });
        }
        self.finish(envelope, retried, true)
    }

    fn finish(
        &self,
        envelope: &RequestEnvelope,
        response: Response,
        retried: bool,
    ) -> Result<Response, DispatchError> {
        let status = response.status();
        if status.is_success() {
            tracing::debug!(url = %envelope.url, status = status.as_u16(), retried, "dispatched");
            Ok(response)
        } else {
            tracing::warn!(url = %envelope.url, status = status.as_u16(), retried, "upstream error");
            Err(DispatchError::UnexpectedStatus {
                status,
                url: envelope.url.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::braids::{ClientId, ClientSecret, RefreshToken};
    use crate::config::{ChatSettings, MusicSettings};
    use crate::providers::{ChatProvider, MusicProvider, ProviderEndpoints};
    use crate::service::{CHAT_APP_TOKEN, CHAT_USER_TOKEN};
    use crate::store::{ExpiringStore, InMemoryStore};
    use aliri_clock::DurationSecs;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn dispatcher(server_uri: &str) -> (Dispatcher, Arc<InMemoryStore>) {
        let endpoints = ProviderEndpoints {
            token_url: format!("{server_uri}/oauth/token").parse().unwrap(),
            validate_url: format!("{server_uri}/oauth/validate").parse().unwrap(),
        };
        let chat = ChatSettings {
            client_id: Some(ClientId::from_static("cid")),
            client_secret: Some(ClientSecret::from_static("sec")),
            refresh_token: Some(RefreshToken::from_static("rt")),
            app_id: None,
        };
        let store = Arc::new(InMemoryStore::new());
        let http = reqwest::Client::new();
        let secrets = Arc::new(SecretService::new(
            Arc::clone(&store) as Arc<dyn ExpiringStore>,
            Arc::new(ChatProvider::new(http.clone(), endpoints.clone(), chat)),
            Arc::new(MusicProvider::new(http.clone(), endpoints, MusicSettings::default())),
        ));
        (Dispatcher::new(http, secrets), store)
    }

    async fn seed(store: &InMemoryStore, key: &str, value: &str) {
        store.set(key, value, DurationSecs(600)).await.unwrap();
    }

    fn token_mock(access_token: &str) -> Mock {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": access_token,
                "expires_in": 14400,
            })))
    }

    #[test]
    fn the_default_client_builds() {
        assert!(default_http_client().is_ok());
    }

    #[tokio::test]
    async fn a_single_401_triggers_one_refresh_and_one_replay() {
        let server = MockServer::start().await;
        // stale bearer rejected once, fresh bearer accepted
        Mock::given(method("GET"))
            .and(path("/api/resource"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/resource"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;
        token_mock("fresh").expect(1).mount(&server).await;

        let (dispatcher, store) = dispatcher(&server.uri()).await;
        seed(&store, CHAT_APP_TOKEN, "stale").await;

        let envelope =
            RequestEnvelope::get(format!("{}/api/resource", server.uri()).parse().unwrap());
        let response = dispatcher.send(&envelope).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            store.get(CHAT_APP_TOKEN).await.unwrap().as_deref(),
            Some("fresh")
        );
    }

    #[tokio::test]
    async fn a_second_401_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/resource"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        token_mock("fresh").expect(1).mount(&server).await;

        let (dispatcher, store) = dispatcher(&server.uri()).await;
        seed(&store, CHAT_APP_TOKEN, "stale").await;

        let envelope =
            RequestEnvelope::get(format!("{}/api/resource", server.uri()).parse().unwrap());
        let err = dispatcher.send(&envelope).await.unwrap_err();
        match err {
            DispatchError::Unauthorized { status, refresh_error } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert!(refresh_error.is_none());
            }
            other => panic!("expected unauthorized, got {other}"),
        }
    }

    #[tokio::test]
    async fn a_400_with_a_live_token_is_a_terminal_payload_error() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/channel"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad title"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oauth/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "expires_in": 900,
            })))
            .expect(1)
            .mount(&server)
            .await;
        token_mock("unused").expect(0).mount(&server).await;

        let (dispatcher, store) = dispatcher(&server.uri()).await;
        seed(&store, CHAT_USER_TOKEN, "live-user-token").await;

        let envelope =
            RequestEnvelope::patch(format!("{}/api/channel", server.uri()).parse().unwrap())
                .with_scope(AuthScope::ChatUser)
                .with_json(serde_json::json!({ "title": "" }));
        let err = dispatcher.send_with_auth_probe(&envelope).await.unwrap_err();
        match err {
            DispatchError::UnexpectedStatus { status, .. } => {
                assert_eq!(status, StatusCode::BAD_REQUEST)
            }
            other => panic!("expected unexpected-status, got {other}"),
        }
    }

    #[tokio::test]
    async fn a_400_with_a_dead_token_is_refreshed_and_replayed() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/channel"))
            .and(header("authorization", "Bearer expired-user-token"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/channel"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oauth/validate"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        token_mock("fresh").expect(1).mount(&server).await;

        let (dispatcher, store) = dispatcher(&server.uri()).await;
        seed(&store, CHAT_USER_TOKEN, "expired-user-token").await;

        let envelope =
            RequestEnvelope::patch(format!("{}/api/channel", server.uri()).parse().unwrap())
                .with_scope(AuthScope::ChatUser)
                .with_json(serde_json::json!({ "title": "now playing" }));
        let response = dispatcher.send_with_auth_probe(&envelope).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
