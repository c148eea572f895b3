use aliri_clock::{DurationSecs, UnixTime};
use serde::{Deserialize, Serialize};

/// A single entry in the expiring secret store
///
/// This is the wire format written to the backing cache: the key the entry
/// lives under, the opaque secret value, and the absolute time at which the
/// entry stops being served.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretRecord {
    /// The name the entry is stored under
    pub key: String,
    /// The opaque secret value
    pub value: String,
    /// The time past which the entry is treated as absent
    pub expiration: UnixTime,
}

impl SecretRecord {
    /// Builds a record that expires exactly `ttl` after `now`
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        now: UnixTime,
        ttl: DurationSecs,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expiration: UnixTime(now.0 + ttl.0),
        }
    }

    /// Whether the record should be treated as absent at `now`
    pub fn is_expired_at(&self, now: UnixTime) -> bool {
        now.0 >= self.expiration.0
    }
}

/// Computes the conservative lifetime used when writing a credential to the
/// store
///
/// Upstream providers report how long a token remains valid. The cache entry
/// is always written with a shorter lifetime so that it disappears before the
/// real token expires, forcing a proactive refresh instead of a reactive 401.
#[derive(Clone, Copy, Debug)]
pub struct TtlPolicy {
    safety_margin: DurationSecs,
    floor: DurationSecs,
}

impl Default for TtlPolicy {
    /// Default policy: a 300 second safety margin with a 60 second floor
    fn default() -> Self {
        Self {
            safety_margin: DurationSecs(300),
            floor: DurationSecs(60),
        }
    }
}

impl TtlPolicy {
    /// Constructs a policy with a custom margin and floor
    pub fn new(safety_margin: DurationSecs, floor: DurationSecs) -> Self {
        Self {
            safety_margin,
            floor,
        }
    }

    /// The lifetime to store for a credential the upstream reports as valid
    /// for `reported`
    ///
    /// Never longer than `reported`. A zero-lifetime grant is already dead
    /// and yields `None`: it must not be cached at all.
    pub fn storage_ttl(&self, reported: DurationSecs) -> Option<DurationSecs> {
        if reported.0 == 0 {
            return None;
        }
        let trimmed = reported.0.saturating_sub(self.safety_margin.0);
        Some(DurationSecs(trimmed.max(self.floor.0).min(reported.0)))
    }
}
