//! Serialized forms stored in the shared tier.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::clamp_ttl;

/// Current wall-clock time in Unix milliseconds.
///
/// Payload expiry is wall-clock based so that every instance agrees on it.
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn expiry_after(ttl: Duration) -> i64 {
    now_millis().saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64)
}

fn remaining(expires_at: i64) -> Option<Duration> {
    let left = expires_at.checked_sub(now_millis())?;
    (left > 0).then(|| clamp_ttl(Duration::from_millis(left as u64)))
}

/// A value as written to the shared tier: `{ value, tags?, expiresAt }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPayload {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    pub expires_at: i64,
}

impl CachedPayload {
    pub fn new(value: Value, tags: &[String], ttl: Duration) -> Self {
        Self {
            value,
            tags: (!tags.is_empty()).then(|| tags.to_vec()),
            expires_at: expiry_after(ttl),
        }
    }

    /// Time left before the payload expires, `None` once it has.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        remaining(self.expires_at)
    }

    pub fn tags(&self) -> &[String] {
        self.tags.as_deref().unwrap_or_default()
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// A row-limited partial result: `{ rows, expiresAt }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialPayload {
    pub rows: Vec<Value>,
    pub expires_at: i64,
}

impl PartialPayload {
    pub fn new(rows: Vec<Value>, ttl: Duration) -> Self {
        Self {
            rows,
            expires_at: expiry_after(ttl),
        }
    }

    pub fn remaining_ttl(&self) -> Option<Duration> {
        remaining(self.expires_at)
    }
}
