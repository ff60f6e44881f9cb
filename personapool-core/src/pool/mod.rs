mod index;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use personapool_common::{
    PersonaStatus, PoolConfig, PoolError, PoolStats, RequestOutcome, SessionCredential,
};
use rand::seq::IteratorRandom;
use tracing::*;

use crate::persona::{BorrowedPersona, PooledPersona, ReturnDisposition};
use crate::policy::{cooldown, health, token_bucket};
use index::PoolIndex;

/// How many IDLE candidates one borrow attempt samples.
const BORROW_CANDIDATES: usize = 3;

/// The shared working set of personas plus its membership index.
///
/// Shared as `Arc<Mutex<PersonaPool>>`; every method below is a single
/// critical section, which is what makes borrow, return and the sweeps
/// indivisible with respect to concurrent callers. None of these methods
/// performs I/O or awaits.
pub struct PersonaPool {
    config: PoolConfig,
    records: HashMap<i64, PooledPersona>,
    index: PoolIndex,
    initialized: bool,
}

impl PersonaPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            records: HashMap::new(),
            index: PoolIndex::new(),
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.records.contains_key(&id)
    }

    pub fn snapshot(&self, id: i64) -> Option<PooledPersona> {
        self.records.get(&id).cloned()
    }

    pub fn personas(&self) -> impl Iterator<Item = &PooledPersona> {
        self.records.values()
    }

    #[cfg(test)]
    pub(crate) fn persona_mut(&mut self, id: i64) -> Option<&mut PooledPersona> {
        self.records.get_mut(&id)
    }

    pub fn all_ids(&self) -> Vec<i64> {
        self.index.all_ids()
    }

    /// Admit a persona into the working set. It starts without a credential
    /// and becomes borrowable only once one is installed. Re-admitting an
    /// existing ID resets its record.
    pub fn insert(&mut self, id: i64, fingerprint: String, health_score: i32) {
        let persona = PooledPersona::new(id, fingerprint, health_score, self.config.max_tokens);
        self.index.insert(id, PersonaStatus::SessionRequired);
        self.records.insert(id, persona);
        info!(persona_id = %id, "Persona admitted to pool (session required)");
    }

    /// Drop a persona from the working set entirely (admin block path).
    pub fn evict(&mut self, id: i64) -> bool {
        self.index.remove_everywhere(id);
        let existed = self.records.remove(&id).is_some();
        if existed {
            info!(persona_id = %id, "Persona evicted from pool");
        }
        existed
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
        self.initialized = false;
        info!("Persona pool cleared");
    }

    /// Lease one persona: sample up to three random IDLE candidates, lazily
    /// refill each bucket, skip candidates without budget, demote candidates
    /// whose credential has expired, and hand out the first that qualifies.
    /// Returns None immediately when nothing qualifies; never blocks.
    pub fn borrow(&mut self, now: DateTime<Utc>) -> Option<BorrowedPersona> {
        let candidates: Vec<i64> = self
            .index
            .set(PersonaStatus::Idle)
            .iter()
            .copied()
            .choose_multiple(&mut rand::rng(), BORROW_CANDIDATES);

        for id in candidates {
            let Some(persona) = self.records.get_mut(&id) else {
                continue;
            };

            token_bucket::refill(
                persona,
                self.config.max_tokens,
                self.config.window_duration,
                now,
            );

            let credential = match &persona.credential {
                Some(c) if !c.is_expired(now) => c.clone(),
                _ => {
                    persona.credential = None;
                    persona.status = PersonaStatus::SessionRequired;
                    self.index
                        .transition(id, PersonaStatus::Idle, PersonaStatus::SessionRequired);
                    debug!(persona_id = %id, "Borrow candidate had an expired credential, demoted");
                    continue;
                }
            };

            if !token_bucket::try_consume(persona) {
                continue;
            }

            persona.status = PersonaStatus::Borrowed;
            persona.borrowed_at = Some(now);
            self.index
                .transition(id, PersonaStatus::Idle, PersonaStatus::Borrowed);

            debug!(
                persona_id = %id,
                remaining_tokens = persona.remaining_tokens,
                "Persona borrowed"
            );

            return Some(BorrowedPersona {
                id,
                fingerprint: persona.fingerprint.clone(),
                credential,
                health_score: persona.health_score,
                borrowed_at: now,
            });
        }

        None
    }

    /// Return a leased persona with its request outcome and move it to the
    /// next state per the health/cooldown policy. Returning a persona that
    /// is not currently borrowed is reported, never raised.
    pub fn return_persona(
        &mut self,
        id: i64,
        outcome: RequestOutcome,
        now: DateTime<Utc>,
    ) -> ReturnDisposition {
        let Some(persona) = self.records.get_mut(&id) else {
            warn!(persona_id = %id, "Return for a persona that is not pooled");
            return ReturnDisposition::NotBorrowed;
        };

        if persona.status != PersonaStatus::Borrowed {
            warn!(
                persona_id = %id,
                status = ?persona.status,
                "Return for a persona that is not borrowed"
            );
            return ReturnDisposition::NotBorrowed;
        }

        persona.borrowed_at = None;

        if outcome.is_rate_limited() {
            persona.consecutive_rate_limits += 1;

            if persona.consecutive_rate_limits >= self.config.suspend_after_rate_limits {
                warn!(
                    persona_id = %id,
                    consecutive = persona.consecutive_rate_limits,
                    "Persona suspended after repeated rate limiting"
                );
                Self::suspend_record(persona, &mut self.index, now);
                return ReturnDisposition::Suspended;
            }

            let backoff =
                cooldown::graduated_backoff(persona.consecutive_rate_limits, &self.config.cooldown);
            let until = now + chrono_duration(backoff);
            persona.status = PersonaStatus::Cooldown;
            persona.cooldown_until = Some(until);
            self.index
                .transition(id, PersonaStatus::Borrowed, PersonaStatus::Cooldown);
            info!(
                persona_id = %id,
                consecutive = persona.consecutive_rate_limits,
                until = %until,
                "Persona rate limited, cooling down"
            );
            return ReturnDisposition::Cooldown { until };
        }

        persona.consecutive_rate_limits = 0;
        persona.health_score = health::apply_delta(persona.health_score, health::delta_for(&outcome));

        if persona.health_score < self.config.suspension_threshold {
            warn!(
                persona_id = %id,
                health = persona.health_score,
                "Persona suspended below health threshold"
            );
            Self::suspend_record(persona, &mut self.index, now);
            return ReturnDisposition::Suspended;
        }

        persona.status = PersonaStatus::Idle;
        self.index
            .transition(id, PersonaStatus::Borrowed, PersonaStatus::Idle);
        debug!(persona_id = %id, health = persona.health_score, "Persona returned");
        ReturnDisposition::Idle
    }

    /// Move every COOLDOWN persona whose cooldown has lapsed back into
    /// circulation: IDLE when its credential is still valid, otherwise
    /// SESSION_REQUIRED. Returns the number recovered.
    pub fn recover_expired_cooldowns(&mut self, now: DateTime<Utc>) -> usize {
        let due: Vec<i64> = self
            .index
            .set(PersonaStatus::Cooldown)
            .iter()
            .copied()
            .filter(|id| {
                self.records
                    .get(id)
                    .map(|p| p.cooldown_until.map(|t| t <= now).unwrap_or(true))
                    .unwrap_or(false)
            })
            .collect();

        for id in &due {
            let Some(persona) = self.records.get_mut(id) else {
                continue;
            };
            persona.cooldown_until = None;

            let next = if persona.has_valid_credential(now) {
                PersonaStatus::Idle
            } else {
                persona.credential = None;
                PersonaStatus::SessionRequired
            };
            persona.status = next;
            self.index.transition(*id, PersonaStatus::Cooldown, next);
            info!(persona_id = %id, next = ?next, "Persona recovered from cooldown");
        }

        due.len()
    }

    /// IDs of BORROWED personas whose lease is older than the threshold.
    /// Read-only; the leak detector issues the forced returns.
    pub fn detect_leaked(&self, threshold: Duration, now: DateTime<Utc>) -> Vec<i64> {
        let cutoff = now - chrono_duration(threshold);
        self.index
            .set(PersonaStatus::Borrowed)
            .iter()
            .copied()
            .filter(|id| {
                self.records
                    .get(id)
                    .and_then(|p| p.borrowed_at)
                    .map(|at| at < cutoff)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Hard external signal (e.g. a site-level ban): suspend from any state,
    /// clearing the credential and moving set membership in the same step so
    /// the persona can never look borrowable while banned.
    pub fn suspend_for_rate_limit(&mut self, id: i64, now: DateTime<Utc>) -> Result<(), PoolError> {
        let Some(persona) = self.records.get_mut(&id) else {
            return Err(PoolError::PersonaNotFound(id));
        };
        warn!(persona_id = %id, "Persona force-suspended by external rate limit signal");
        Self::suspend_record(persona, &mut self.index, now);
        Ok(())
    }

    /// Install a freshly issued credential. SESSION_REQUIRED personas become
    /// IDLE; IDLE personas get their credential replaced in place (proactive
    /// renewal). Any other state skips the install: the persona moved on
    /// while the credential was being issued.
    pub fn install_credential(
        &mut self,
        id: i64,
        credential: SessionCredential,
    ) -> Result<bool, PoolError> {
        let Some(persona) = self.records.get_mut(&id) else {
            return Err(PoolError::PersonaNotFound(id));
        };

        match persona.status {
            PersonaStatus::SessionRequired => {
                persona.credential = Some(credential);
                persona.status = PersonaStatus::Idle;
                self.index
                    .transition(id, PersonaStatus::SessionRequired, PersonaStatus::Idle);
                info!(persona_id = %id, "Credential installed, persona idle");
                Ok(true)
            }
            PersonaStatus::Idle => {
                persona.credential = Some(credential);
                info!(persona_id = %id, "Credential renewed in place");
                Ok(true)
            }
            status => {
                warn!(persona_id = %id, ?status, "Credential install skipped");
                Ok(false)
            }
        }
    }

    /// Demote an IDLE persona whose credential has run out back to
    /// SESSION_REQUIRED (credential-expiry sweep).
    pub fn expire_credential(&mut self, id: i64) -> Result<bool, PoolError> {
        let Some(persona) = self.records.get_mut(&id) else {
            return Err(PoolError::PersonaNotFound(id));
        };

        if persona.status != PersonaStatus::Idle {
            return Ok(false);
        }

        persona.credential = None;
        persona.status = PersonaStatus::SessionRequired;
        self.index
            .transition(id, PersonaStatus::Idle, PersonaStatus::SessionRequired);
        info!(persona_id = %id, "Credential expired, session required");
        Ok(true)
    }

    /// Time-gated SUSPENDED -> SESSION_REQUIRED restore: requires the
    /// minimum suspension to have elapsed and the health score to be at or
    /// above the suspension threshold. Resets budget and counters; a new
    /// credential must be issued before the persona circulates again.
    pub fn restore(&mut self, id: i64, now: DateTime<Utc>) -> Result<(), PoolError> {
        let eligible = self.is_restorable(id, now);
        let Some(persona) = self.records.get_mut(&id) else {
            return Err(PoolError::PersonaNotFound(id));
        };
        if !eligible {
            return Err(PoolError::RestoreNotEligible(id));
        }

        persona.health_score = self.config.restore_health;
        persona.remaining_tokens = self.config.max_tokens;
        persona.max_tokens = self.config.max_tokens;
        persona.window_start = None;
        persona.window_end = None;
        persona.credential = None;
        persona.borrowed_at = None;
        persona.cooldown_until = None;
        persona.consecutive_rate_limits = 0;
        persona.suspended_at = None;
        persona.status = PersonaStatus::SessionRequired;
        self.index
            .transition(id, PersonaStatus::Suspended, PersonaStatus::SessionRequired);

        info!(
            persona_id = %id,
            health = self.config.restore_health,
            "Persona restored to pool (session required)"
        );
        Ok(())
    }

    fn is_restorable(&self, id: i64, now: DateTime<Utc>) -> bool {
        let Some(persona) = self.records.get(&id) else {
            return false;
        };
        let min_elapsed = persona
            .suspended_at
            .map(|at| now - at >= chrono_duration(self.config.min_suspension))
            .unwrap_or(false);
        persona.status == PersonaStatus::Suspended
            && min_elapsed
            && persona.health_score >= self.config.suspension_threshold
    }

    pub fn session_required_ids(&self) -> Vec<i64> {
        self.index
            .set(PersonaStatus::SessionRequired)
            .iter()
            .copied()
            .collect()
    }

    /// IDLE personas whose credential expires within the buffer (candidates
    /// for proactive renewal), including those already past expiry.
    pub fn expiring_credential_ids(&self, now: DateTime<Utc>, buffer: Duration) -> Vec<i64> {
        self.index
            .set(PersonaStatus::Idle)
            .iter()
            .copied()
            .filter(|id| {
                self.records
                    .get(id)
                    .and_then(|p| p.credential.as_ref())
                    .map(|c| c.expires_within(now, buffer))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// SUSPENDED personas that satisfy the restore gate.
    pub fn restorable_ids(&self, now: DateTime<Utc>) -> Vec<i64> {
        self.index
            .set(PersonaStatus::Suspended)
            .iter()
            .copied()
            .filter(|id| self.is_restorable(*id, now))
            .collect()
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.index.set(PersonaStatus::Idle);

        let mut health_min = 0;
        let mut health_max = 0;
        let mut health_sum: i64 = 0;
        let mut counted = 0usize;

        for id in idle {
            if let Some(persona) = self.records.get(id) {
                if counted == 0 {
                    health_min = persona.health_score;
                    health_max = persona.health_score;
                } else {
                    health_min = health_min.min(persona.health_score);
                    health_max = health_max.max(persona.health_score);
                }
                health_sum += persona.health_score as i64;
                counted += 1;
            }
        }

        PoolStats {
            total: self.records.len(),
            idle: idle.len(),
            borrowed: self.index.set(PersonaStatus::Borrowed).len(),
            cooldown: self.index.set(PersonaStatus::Cooldown).len(),
            session_required: self.index.set(PersonaStatus::SessionRequired).len(),
            suspended: self.index.set(PersonaStatus::Suspended).len(),
            health_min,
            health_avg: if counted > 0 {
                health_sum as f64 / counted as f64
            } else {
                0.0
            },
            health_max,
        }
    }

    fn suspend_record(persona: &mut PooledPersona, index: &mut PoolIndex, now: DateTime<Utc>) {
        let from = persona.status;
        persona.status = PersonaStatus::Suspended;
        persona.suspended_at = Some(now);
        persona.credential = None;
        persona.cooldown_until = None;
        persona.borrowed_at = None;
        index.transition(persona.id, from, PersonaStatus::Suspended);
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(d.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use personapool_common::{CooldownConfig, Secret};
    use tokio::sync::Mutex;

    use super::*;

    fn test_config() -> PoolConfig {
        PoolConfig {
            max_tokens: 80,
            window_duration: Duration::from_secs(60),
            suspension_threshold: 30,
            restore_health: 70,
            suspend_after_rate_limits: 5,
            min_suspension: Duration::from_secs(3600),
            leak_threshold: Duration::from_secs(60),
            cooldown: CooldownConfig {
                base: Duration::from_secs(30),
                multiplier: 2.0,
                max: Duration::from_secs(600),
            },
        }
    }

    fn credential(expires_at: DateTime<Utc>) -> SessionCredential {
        SessionCredential {
            token: Secret::new("token".to_owned()),
            secondary_token: None,
            tertiary_token: None,
            expires_at,
        }
    }

    fn pool_with_idle(ids: &[i64], now: DateTime<Utc>) -> PersonaPool {
        let mut pool = PersonaPool::new(test_config());
        for id in ids {
            pool.insert(*id, format!("fp-{id}"), 100);
            pool.install_credential(*id, credential(now + chrono::Duration::minutes(30)))
                .unwrap();
        }
        pool
    }

    fn assert_index_invariant(pool: &PersonaPool) {
        for persona in pool.records.values() {
            assert_eq!(
                pool.index.membership_count(persona.id),
                1,
                "persona {} is in {} sets",
                persona.id,
                pool.index.membership_count(persona.id)
            );
            assert!(pool.index.set(persona.status).contains(&persona.id));
            assert!(persona.remaining_tokens <= persona.max_tokens);
            assert!((0..=100).contains(&persona.health_score));
        }
    }

    #[test]
    fn test_borrow_moves_to_borrowed() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1], now);

        let lease = pool.borrow(now).expect("one idle persona");
        assert_eq!(lease.id, 1);
        assert_eq!(lease.borrowed_at, now);

        let record = pool.snapshot(1).unwrap();
        assert_eq!(record.status, PersonaStatus::Borrowed);
        assert_eq!(record.remaining_tokens, 79);
        assert!(pool.borrow(now).is_none());
        assert_index_invariant(&pool);
    }

    #[test]
    fn test_borrow_empty_pool_returns_none() {
        let now = Utc::now();
        let mut pool = PersonaPool::new(test_config());
        assert!(pool.borrow(now).is_none());
    }

    #[test]
    fn test_borrow_skips_session_required() {
        let now = Utc::now();
        let mut pool = PersonaPool::new(test_config());
        pool.insert(1, "fp-1".into(), 100);
        assert!(pool.borrow(now).is_none());
    }

    #[test]
    fn test_borrow_demotes_expired_credential() {
        let now = Utc::now();
        let mut pool = PersonaPool::new(test_config());
        pool.insert(1, "fp-1".into(), 100);
        pool.install_credential(1, credential(now + chrono::Duration::minutes(30)))
            .unwrap();

        let later = now + chrono::Duration::hours(1);
        assert!(pool.borrow(later).is_none());

        let record = pool.snapshot(1).unwrap();
        assert_eq!(record.status, PersonaStatus::SessionRequired);
        assert!(record.credential.is_none());
        assert_index_invariant(&pool);
    }

    #[test]
    fn test_return_success_clamps_health_and_idles() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1], now);
        pool.records.get_mut(&1).unwrap().health_score = 95;

        pool.borrow(now).unwrap();
        let disposition = pool.return_persona(1, RequestOutcome::success(200), now);

        assert_eq!(disposition, ReturnDisposition::Idle);
        let record = pool.snapshot(1).unwrap();
        assert_eq!(record.health_score, 100);
        assert_eq!(record.status, PersonaStatus::Idle);
        assert!(record.borrowed_at.is_none());
        assert_index_invariant(&pool);
    }

    #[test]
    fn test_return_not_borrowed_is_a_noop() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1], now);

        assert_eq!(
            pool.return_persona(1, RequestOutcome::success(200), now),
            ReturnDisposition::NotBorrowed
        );
        assert_eq!(
            pool.return_persona(99, RequestOutcome::success(200), now),
            ReturnDisposition::NotBorrowed
        );
        assert_eq!(pool.snapshot(1).unwrap().status, PersonaStatus::Idle);
    }

    #[test]
    fn test_return_rate_limited_cools_down_with_backoff() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1], now);

        pool.borrow(now).unwrap();
        let disposition = pool.return_persona(1, RequestOutcome::failure(429), now);

        let until = now + chrono::Duration::seconds(30);
        assert_eq!(disposition, ReturnDisposition::Cooldown { until });
        let record = pool.snapshot(1).unwrap();
        assert_eq!(record.status, PersonaStatus::Cooldown);
        assert_eq!(record.consecutive_rate_limits, 1);
        // Health is untouched by a 429
        assert_eq!(record.health_score, 100);
        assert_index_invariant(&pool);
    }

    #[test]
    fn test_fifth_consecutive_rate_limit_suspends_directly() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1], now);
        pool.records.get_mut(&1).unwrap().consecutive_rate_limits = 4;

        pool.borrow(now).unwrap();
        let disposition = pool.return_persona(1, RequestOutcome::failure(429), now);

        assert_eq!(disposition, ReturnDisposition::Suspended);
        let record = pool.snapshot(1).unwrap();
        assert_eq!(record.status, PersonaStatus::Suspended);
        assert_eq!(record.consecutive_rate_limits, 5);
        assert!(record.credential.is_none());
        assert_eq!(record.suspended_at, Some(now));
        assert_index_invariant(&pool);
    }

    #[test]
    fn test_non_rate_limit_outcome_resets_consecutive_count() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1], now);
        pool.records.get_mut(&1).unwrap().consecutive_rate_limits = 3;

        pool.borrow(now).unwrap();
        pool.return_persona(1, RequestOutcome::failure(500), now);

        assert_eq!(pool.snapshot(1).unwrap().consecutive_rate_limits, 0);
    }

    #[test]
    fn test_health_floor_forces_suspension() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1], now);
        pool.records.get_mut(&1).unwrap().health_score = 35;

        pool.borrow(now).unwrap();
        // 35 - 10 = 25 < 30
        let disposition = pool.return_persona(1, RequestOutcome::failure(502), now);

        assert_eq!(disposition, ReturnDisposition::Suspended);
        assert_eq!(pool.snapshot(1).unwrap().status, PersonaStatus::Suspended);
        assert_index_invariant(&pool);
    }

    #[test]
    fn test_token_budget_exhaustion_yields_none() {
        let now = Utc::now();
        let mut config = test_config();
        config.max_tokens = 1;
        let mut pool = PersonaPool::new(config);
        for id in [1, 2] {
            pool.insert(id, format!("fp-{id}"), 100);
            pool.install_credential(id, credential(now + chrono::Duration::minutes(30)))
                .unwrap();
        }

        // Drain the first persona's single token, then lease the second.
        let first = pool.borrow(now).unwrap();
        pool.return_persona(first.id, RequestOutcome::success(200), now);
        let second = pool.borrow(now).unwrap();
        assert_ne!(first.id, second.id);

        // One persona is leased, the other has no tokens left this window.
        assert!(pool.borrow(now).is_none());

        // A fresh window refills the drained persona.
        let later = now + chrono::Duration::seconds(61);
        assert!(pool.borrow(later).is_some());
    }

    #[test]
    fn test_cooldown_recovery_prefers_idle() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1, 2], now);

        for id in [1, 2] {
            let p = pool.records.get_mut(&id).unwrap();
            p.status = PersonaStatus::Cooldown;
            p.cooldown_until = Some(now - chrono::Duration::seconds(1));
            pool.index
                .transition(id, PersonaStatus::Idle, PersonaStatus::Cooldown);
        }
        // Second persona's credential has already expired
        pool.records.get_mut(&2).unwrap().credential =
            Some(credential(now - chrono::Duration::minutes(1)));

        let recovered = pool.recover_expired_cooldowns(now);
        assert_eq!(recovered, 2);
        assert_eq!(pool.snapshot(1).unwrap().status, PersonaStatus::Idle);
        assert_eq!(
            pool.snapshot(2).unwrap().status,
            PersonaStatus::SessionRequired
        );
        assert!(pool.snapshot(2).unwrap().credential.is_none());
        assert_index_invariant(&pool);
    }

    #[test]
    fn test_cooldown_recovery_leaves_active_cooldowns() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1], now);
        let p = pool.records.get_mut(&1).unwrap();
        p.status = PersonaStatus::Cooldown;
        p.cooldown_until = Some(now + chrono::Duration::minutes(5));
        pool.index
            .transition(1, PersonaStatus::Idle, PersonaStatus::Cooldown);

        assert_eq!(pool.recover_expired_cooldowns(now), 0);
        assert_eq!(pool.snapshot(1).unwrap().status, PersonaStatus::Cooldown);
    }

    #[test]
    fn test_detect_leaked_finds_stale_leases_only() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1, 2], now);

        let stale = now - chrono::Duration::minutes(10);
        pool.borrow(stale);
        pool.borrow(now);

        let leaked = pool.detect_leaked(Duration::from_secs(300), now);
        assert_eq!(leaked.len(), 1);

        // Forced return reclaims the lease with a generic failure
        let disposition = pool.return_persona(leaked[0], RequestOutcome::failure(0), now);
        assert_ne!(disposition, ReturnDisposition::NotBorrowed);
        assert!(pool
            .detect_leaked(Duration::from_secs(300), now)
            .is_empty());
        let record = pool.snapshot(leaked[0]).unwrap();
        assert_eq!(record.status, PersonaStatus::Idle);
        assert_eq!(record.health_score, 95);
        assert_index_invariant(&pool);
    }

    #[test]
    fn test_suspend_for_rate_limit_from_any_state() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1], now);

        pool.suspend_for_rate_limit(1, now).unwrap();
        let record = pool.snapshot(1).unwrap();
        assert_eq!(record.status, PersonaStatus::Suspended);
        assert!(record.credential.is_none());
        assert_index_invariant(&pool);

        assert!(matches!(
            pool.suspend_for_rate_limit(99, now),
            Err(PoolError::PersonaNotFound(99))
        ));
    }

    #[test]
    fn test_restore_gate_requires_time_and_health() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1], now);
        pool.suspend_for_rate_limit(1, now).unwrap();

        // Too early
        assert!(matches!(
            pool.restore(1, now + chrono::Duration::minutes(30)),
            Err(PoolError::RestoreNotEligible(1))
        ));

        // Old enough but unhealthy
        pool.records.get_mut(&1).unwrap().health_score = 10;
        let later = now + chrono::Duration::hours(2);
        assert!(matches!(
            pool.restore(1, later),
            Err(PoolError::RestoreNotEligible(1))
        ));
        assert!(pool.restorable_ids(later).is_empty());

        // Old enough and healthy enough
        pool.records.get_mut(&1).unwrap().health_score = 40;
        assert_eq!(pool.restorable_ids(later), vec![1]);
        pool.restore(1, later).unwrap();

        let record = pool.snapshot(1).unwrap();
        assert_eq!(record.status, PersonaStatus::SessionRequired);
        assert_eq!(record.health_score, 70);
        assert_eq!(record.remaining_tokens, 80);
        assert_eq!(record.consecutive_rate_limits, 0);
        assert!(record.suspended_at.is_none());
        assert_index_invariant(&pool);
    }

    #[test]
    fn test_expiring_credentials_and_expiry_demotion() {
        let now = Utc::now();
        let mut pool = PersonaPool::new(test_config());
        pool.insert(1, "fp-1".into(), 100);
        pool.install_credential(1, credential(now + chrono::Duration::minutes(2)))
            .unwrap();
        pool.insert(2, "fp-2".into(), 100);
        pool.install_credential(2, credential(now + chrono::Duration::minutes(30)))
            .unwrap();

        let expiring = pool.expiring_credential_ids(now, Duration::from_secs(300));
        assert_eq!(expiring, vec![1]);

        assert!(pool.expire_credential(1).unwrap());
        assert_eq!(
            pool.snapshot(1).unwrap().status,
            PersonaStatus::SessionRequired
        );
        // Not idle anymore, second call is a no-op
        assert!(!pool.expire_credential(1).unwrap());
        assert_index_invariant(&pool);
    }

    #[test]
    fn test_stats_cover_idle_health_only() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1, 2, 3], now);
        pool.records.get_mut(&1).unwrap().health_score = 60;
        pool.records.get_mut(&2).unwrap().health_score = 80;
        pool.borrow(now);

        let stats = pool.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.borrowed, 1);
        assert_eq!(stats.idle + stats.borrowed + stats.cooldown + stats.session_required + stats.suspended, 3);
        assert!(stats.health_min <= stats.health_max);
        assert!(stats.health_avg >= stats.health_min as f64);
        assert!(stats.health_avg <= stats.health_max as f64);
    }

    #[test]
    fn test_clear_resets_the_working_set() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1, 2], now);
        pool.mark_initialized();

        pool.clear();

        assert!(pool.is_empty());
        assert!(!pool.is_initialized());
        assert_eq!(pool.stats().total, 0);
        assert_eq!(pool.stats().health_avg, 0.0);
    }

    #[test]
    fn test_evict_removes_everywhere() {
        let now = Utc::now();
        let mut pool = pool_with_idle(&[1], now);
        assert!(pool.evict(1));
        assert!(!pool.contains(1));
        assert!(pool.all_ids().is_empty());
        assert!(!pool.evict(1));
    }

    #[tokio::test]
    async fn test_single_idle_persona_is_never_double_leased() {
        let now = Utc::now();
        let pool = Arc::new(Mutex::new(pool_with_idle(&[1], now)));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.lock().await.borrow(Utc::now()).is_some()
            }));
        }

        let mut leased = 0;
        for handle in handles {
            if handle.await.unwrap() {
                leased += 1;
            }
        }
        assert_eq!(leased, 1);
    }
}
