use std::fmt::Debug;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wrapper that keeps credential material out of logs and debug output.
#[derive(PartialEq, Eq, Clone)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    pub const fn new(v: T) -> Self {
        Self(v)
    }

    pub fn expose_secret(&self) -> &T {
        &self.0
    }
}

impl<T> From<T> for Secret<T> {
    fn from(v: T) -> Self {
        Self::new(v)
    }
}

impl<'de, T> Deserialize<'de> for Secret<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = Deserialize::deserialize::<D>(deserializer)?;
        Ok(Self::new(v))
    }
}

impl<T> Serialize for Secret<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Debug for Secret<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<secret>")
    }
}

pub const RATE_LIMIT_STATUS: u16 = 429;

/// Session credential bundle issued for one persona. The primary token is
/// always present; the two auxiliary cookie values are target-site specific
/// and may be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub token: Secret<String>,
    pub secondary_token: Option<Secret<String>>,
    pub tertiary_token: Option<Secret<String>>,
    pub expires_at: DateTime<Utc>,
}

impl SessionCredential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn expires_within(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        match chrono::Duration::from_std(buffer) {
            Ok(buffer) => self.expires_at <= now + buffer,
            Err(_) => false,
        }
    }
}

/// What happened to the request a persona was leased for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOutcome {
    pub success: bool,
    pub http_status: u16,
}

impl RequestOutcome {
    pub const fn success(http_status: u16) -> Self {
        Self {
            success: true,
            http_status,
        }
    }

    pub const fn failure(http_status: u16) -> Self {
        Self {
            success: false,
            http_status,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        !self.success && self.http_status == RATE_LIMIT_STATUS
    }
}

/// Pool-side lifecycle state of a persona. Blocked personas exist only in
/// the durable store and are absent from the pool entirely.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, poem_openapi::Enum,
)]
pub enum PersonaStatus {
    SessionRequired,
    Idle,
    Borrowed,
    Cooldown,
    Suspended,
}

impl PersonaStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, PersonaStatus::Idle)
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self, PersonaStatus::Borrowed)
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, PersonaStatus::Suspended)
    }
}

/// Aggregate pool counters; health aggregates are computed over IDLE
/// members only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub borrowed: usize,
    pub cooldown: usize,
    pub session_required: usize,
    pub suspended: usize,
    pub health_min: i32,
    pub health_avg: f64,
    pub health_max: i32,
}
