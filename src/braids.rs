use aliri_braid::braid;
use std::fmt;

macro_rules! redacted {
    ($ty:ty => $label:literal, $reveal:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("\"")?;
                reveal_prefix(&self.0, f, $reveal)?;
                f.write_str("\"")
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("[", $label, "]"))
            }
        }
    };
}

/// Writes at most `reveal` leading characters of a secret, then an ellipsis.
fn reveal_prefix(raw: &str, f: &mut fmt::Formatter, reveal: usize) -> fmt::Result {
    let mut end = 0;
    for (count, (idx, c)) in raw.char_indices().enumerate() {
        if count == reveal {
            break;
        }
        end = idx + c.len_utf8();
    }
    if end < raw.len() {
        f.write_str(&raw[..end])?;
        f.write_str("…")
    } else {
        f.write_str(raw)
    }
}

/// A client ID registered with an upstream provider
#[braid(serde)]
pub struct ClientId;

/// A client secret shared with an upstream provider
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

redacted!(ClientSecretRef => "client secret", 4);

/// A bearer access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef => "access token", 6);

/// A long-lived refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

redacted!(RefreshTokenRef => "refresh token", 4);

/// The administrative token the embedding service accepts on its management
/// surface; reserved here so it carries the same redaction as other secrets
#[braid(serde, debug = "owned", display = "owned")]
pub struct AdminToken;

redacted!(AdminTokenRef => "admin token", 2);
