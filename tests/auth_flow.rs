//! End-to-end credential lifecycle against mock upstreams

use aliri_clock::{Clock, DurationSecs, System};
use reqwest::StatusCode;
use std::sync::Arc;
use tokenward::config::{ChatSettings, MusicSettings};
use tokenward::providers::{ChatProvider, MusicProvider, ProviderEndpoints};
use tokenward::service::{CHAT_APP_TOKEN, CHAT_USER_TOKEN, MUSIC_TOKEN};
use tokenward::store::{ExpiringStore, InMemoryStore};
use tokenward::{
    AuthScope, ClientId, ClientSecret, Dispatcher, RefreshToken, RequestEnvelope, SecretService,
};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoints(server_uri: &str, prefix: &str) -> ProviderEndpoints {
    ProviderEndpoints {
        token_url: format!("{server_uri}/{prefix}/token").parse().unwrap(),
        validate_url: format!("{server_uri}/{prefix}/validate").parse().unwrap(),
    }
}

fn build_service(
    server_uri: &str,
    store: Arc<InMemoryStore>,
    chat: ChatSettings,
    music: MusicSettings,
) -> Arc<SecretService> {
    let http = reqwest::Client::new();
    Arc::new(SecretService::new(
        store,
        Arc::new(ChatProvider::new(
            http.clone(),
            endpoints(server_uri, "chat"),
            chat,
        )),
        Arc::new(MusicProvider::new(
            http,
            endpoints(server_uri, "music"),
            music,
        )),
    ))
}

/// Startup with chat app credentials only and full music credentials: the
/// obtainable tokens are provisioned with trimmed TTLs, the unobtainable one
/// is skipped without aborting, and the first authenticated call afterwards
/// is served from cache.
#[tokio::test]
async fn init_provisions_what_it_can_and_serves_from_cache_afterwards() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "chat-app",
            "expires_in": 14400,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/music/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "music-user",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryStore::new());
    let service = build_service(
        &server.uri(),
        Arc::clone(&store),
        ChatSettings {
            client_id: Some(ClientId::from_static("cid")),
            client_secret: Some(ClientSecret::from_static("sec")),
            refresh_token: None,
            app_id: None,
        },
        MusicSettings {
            client_id: Some(ClientId::from_static("mid")),
            client_secret: Some(ClientSecret::from_static("msec")),
            refresh_token: Some(RefreshToken::from_static("mrt")),
        },
    );

    let before = System.now();
    service.init_secrets().await;

    // obtainable credentials are cached with the safety margin trimmed off
    let app = store.record(CHAT_APP_TOKEN).await.expect("app token cached");
    assert_eq!(app.value, "chat-app");
    let app_ttl = app.expiration.0 - before.0;
    assert!(
        (14_095..=14_105).contains(&app_ttl),
        "app ttl was {app_ttl}"
    );

    let music = store.record(MUSIC_TOKEN).await.expect("music token cached");
    assert_eq!(music.value, "music-user");
    let music_ttl = music.expiration.0 - before.0;
    assert!((3_295..=3_305).contains(&music_ttl), "music ttl was {music_ttl}");

    // the user token has no refresh token to exchange and stays absent
    assert!(store.record(CHAT_USER_TOKEN).await.is_none());

    // a later call reads the cache; the expect(1) mocks prove no second mint
    let headers = service.build_auth_headers().await.unwrap();
    assert_eq!(
        headers.get(reqwest::header::AUTHORIZATION).unwrap(),
        "Bearer chat-app"
    );
    assert_eq!(headers.get("client-id").unwrap(), "cid");
}

/// A privileged channel update whose user token was revoked upstream: the
/// first attempt answers 401, the token is refreshed through the refresh
/// grant, and the single replay succeeds.
#[tokio::test]
async fn revoked_user_token_is_refreshed_and_the_update_replayed() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/channel"))
        .and(header("authorization", "Bearer revoked-user"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/channel"))
        .and(header("authorization", "Bearer fresh-user"))
        .and(header("client-id", "cid"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh-user",
            "expires_in": 5_270_400,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryStore::new());
    store
        .set(CHAT_USER_TOKEN, "revoked-user", DurationSecs(600))
        .await
        .unwrap();
    let service = build_service(
        &server.uri(),
        Arc::clone(&store),
        ChatSettings {
            client_id: Some(ClientId::from_static("cid")),
            client_secret: Some(ClientSecret::from_static("sec")),
            refresh_token: Some(RefreshToken::from_static("rt")),
            app_id: None,
        },
        MusicSettings::default(),
    );
    let dispatcher = Dispatcher::new(reqwest::Client::new(), service);

    let envelope =
        RequestEnvelope::patch(format!("{}/api/channel", server.uri()).parse().unwrap())
            .with_scope(AuthScope::ChatUser)
            .with_json(serde_json::json!({ "title": "now playing: something good" }));
    let response = dispatcher.send(&envelope).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // the replacement token is what later readers now see
    assert_eq!(
        store.get(CHAT_USER_TOKEN).await.unwrap().as_deref(),
        Some("fresh-user")
    );
}
