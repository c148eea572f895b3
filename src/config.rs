//! Environment-seeded configuration
//!
//! Provider secret bundles are read once at process start and are immutable
//! for the process lifetime. They are never written to the cache. Absent
//! variables are not an immediate error: each surfaces later as a
//! `MissingConfig`/`MissingCredential` at the first operation that needs it,
//! so one unconfigured provider cannot keep the rest of the process down.

use crate::braids::{AdminToken, ClientId, ClientSecret, RefreshToken};

/// Static secrets for the chat platform
#[derive(Clone, Debug, Default)]
pub struct ChatSettings {
    /// OAuth client ID
    pub client_id: Option<ClientId>,
    /// OAuth client secret
    pub client_secret: Option<ClientSecret>,
    /// Long-lived refresh token for the channel owner's user grant
    pub refresh_token: Option<RefreshToken>,
    /// The broadcaster user ID used in broadcaster-scoped webhook conditions
    /// (see `SubscriptionClient::with_broadcaster`)
    pub app_id: Option<String>,
}

/// Static secrets for the music platform
#[derive(Clone, Debug, Default)]
pub struct MusicSettings {
    /// OAuth client ID
    pub client_id: Option<ClientId>,
    /// OAuth client secret
    pub client_secret: Option<ClientSecret>,
    /// Long-lived refresh token for the listening account
    pub refresh_token: Option<RefreshToken>,
}

/// Process-wide settings
#[derive(Clone, Debug, Default)]
pub struct Settings {
    /// Address of the backing secret cache; required before serving traffic
    pub cache_addr: Option<String>,
    /// Token the embedding service accepts on its administrative surface;
    /// held here only so it is read once and rendered redacted
    pub admin_token: Option<AdminToken>,
    /// Chat platform secret bundle
    pub chat: ChatSettings,
    /// Music platform secret bundle
    pub music: MusicSettings,
}

impl Settings {
    /// Reads all settings from the process environment
    pub fn from_env() -> Self {
        Self {
            cache_addr: env_var("CACHE_ADDR"),
            admin_token: env_var("ADMIN_TOKEN").map(AdminToken::from),
            chat: ChatSettings {
                client_id: env_var("CHAT_CLIENT_ID").map(ClientId::from),
                client_secret: env_var("CHAT_CLIENT_SECRET").map(ClientSecret::from),
                refresh_token: env_var("CHAT_REFRESH_TOKEN").map(RefreshToken::from),
                app_id: env_var("CHAT_APP_ID"),
            },
            music: MusicSettings {
                client_id: env_var("MUSIC_CLIENT_ID").map(ClientId::from),
                client_secret: env_var("MUSIC_CLIENT_SECRET").map(ClientSecret::from),
                refresh_token: env_var("MUSIC_REFRESH_TOKEN").map(RefreshToken::from),
            },
        }
    }
}

/// Reads one variable, treating empty or whitespace-only values as unset
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
