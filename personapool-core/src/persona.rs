use chrono::{DateTime, Utc};
use personapool_common::{PersonaStatus, SessionCredential};

/// Cache-resident state of one browsing persona. Mutated only through the
/// pool's transition operations; callers never touch fields directly.
#[derive(Debug, Clone)]
pub struct PooledPersona {
    pub id: i64,
    pub fingerprint: String,
    pub credential: Option<SessionCredential>,
    pub remaining_tokens: u32,
    pub max_tokens: u32,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub health_score: i32,
    pub status: PersonaStatus,
    pub borrowed_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub consecutive_rate_limits: u32,
    pub suspended_at: Option<DateTime<Utc>>,
}

impl PooledPersona {
    /// A freshly admitted persona: no credential yet, full budget.
    pub fn new(id: i64, fingerprint: String, health_score: i32, max_tokens: u32) -> Self {
        Self {
            id,
            fingerprint,
            credential: None,
            remaining_tokens: max_tokens,
            max_tokens,
            window_start: None,
            window_end: None,
            health_score,
            status: PersonaStatus::SessionRequired,
            borrowed_at: None,
            cooldown_until: None,
            consecutive_rate_limits: 0,
            suspended_at: None,
        }
    }

    pub fn has_valid_credential(&self, now: DateTime<Utc>) -> bool {
        self.credential
            .as_ref()
            .map(|c| !c.is_expired(now))
            .unwrap_or(false)
    }
}

/// Lease handed to a caller by `borrow`. Carries everything needed to make
/// a request; the pool keeps the authoritative record.
#[derive(Debug, Clone)]
pub struct BorrowedPersona {
    pub id: i64,
    pub fingerprint: String,
    pub credential: SessionCredential,
    pub health_score: i32,
    pub borrowed_at: DateTime<Utc>,
}

/// Where a returned persona ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnDisposition {
    Idle,
    Cooldown { until: DateTime<Utc> },
    Suspended,
    /// The persona was not leased (unknown ID, or already reclaimed by the
    /// leak detector). Reported, never raised.
    NotBorrowed,
}
