use std::sync::Arc;

use chrono::Utc;
use personapool_common::PersonaPoolConfigStore;
use tokio::sync::Mutex;
use tracing::*;

use crate::issuer::CredentialIssuer;
use crate::leak::reclaim_leaked;
use crate::lock::WarmUpLock;
use crate::pool::PersonaPool;
use crate::reconcile::reconcile;
use crate::sessions::issue_credentials;
use crate::store::PersonaStore;
use crate::warmup::warm_up;

/// Single maintenance loop driving every pool sweep on a fixed delay.
/// Individual steps log their failures and never abort the tick.
pub async fn run_housekeeper(
    pool: Arc<Mutex<PersonaPool>>,
    store: Arc<dyn PersonaStore + Send + Sync>,
    lock: Arc<dyn WarmUpLock + Send + Sync>,
    issuer: Arc<dyn CredentialIssuer + Send + Sync>,
    config: PersonaPoolConfigStore,
) {
    let mut interval = tokio::time::interval(config.housekeeper.interval);
    let mut tick: u64 = 0;

    loop {
        interval.tick().await;
        tick += 1;
        housekeeping_tick(
            &pool,
            store.as_ref(),
            lock.as_ref(),
            issuer.as_ref(),
            &config,
            tick,
        )
        .await;
    }
}

pub async fn housekeeping_tick(
    pool: &Arc<Mutex<PersonaPool>>,
    store: &(dyn PersonaStore + Send + Sync),
    lock: &(dyn WarmUpLock + Send + Sync),
    issuer: &(dyn CredentialIssuer + Send + Sync),
    config: &PersonaPoolConfigStore,
    tick: u64,
) {
    let now = Utc::now();

    if !pool.lock().await.is_initialized() {
        if let Err(error) = warm_up(pool, store, lock, &config.warmup).await {
            error!(%error, "Warm-up failed, retrying on the next tick");
        }
    }

    let recovered = pool.lock().await.recover_expired_cooldowns(now);
    if recovered > 0 {
        info!(personas = recovered, "Recovered personas from cooldown");
    }

    let restorable = { pool.lock().await.restorable_ids(now) };
    let mut restored = 0;
    for id in restorable {
        match pool.lock().await.restore(id, now) {
            Ok(()) => restored += 1,
            Err(error) => warn!(persona_id = %id, %error, "Could not restore persona"),
        }
    }
    if restored > 0 {
        info!(personas = restored, "Restored suspended personas");
    }

    issue_credentials(pool, issuer, &config.issuer).await;

    reclaim_leaked(pool, config.pool.leak_threshold).await;

    if config.housekeeper.reconcile_every > 0 && tick % config.housekeeper.reconcile_every as u64 == 0
    {
        if let Err(error) = reconcile(pool, store).await {
            warn!(%error, "Reconciliation failed, retrying on a later tick");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use personapool_common::{PoolError, Secret, SessionCredential};
    use personapool_db_entities::Persona::{self, PersonaState};

    use super::*;
    use crate::store::PersonaUpdate;

    struct StubStore {
        available: Vec<Persona::Model>,
    }

    #[async_trait]
    impl PersonaStore for StubStore {
        async fn find_available(&self) -> Result<Vec<Persona::Model>, PoolError> {
            Ok(self.available.clone())
        }

        async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Persona::Model>, PoolError> {
            Ok(self
                .available
                .iter()
                .filter(|r| ids.contains(&r.id))
                .cloned()
                .collect())
        }

        async fn persist_all(&self, _updates: &[PersonaUpdate]) -> Result<(), PoolError> {
            Ok(())
        }
    }

    struct StubLock;

    #[async_trait]
    impl WarmUpLock for StubLock {
        async fn try_acquire(&self, _key: &str, _lease: Duration) -> Result<bool, PoolError> {
            Ok(true)
        }

        async fn release(&self, _key: &str) -> Result<(), PoolError> {
            Ok(())
        }
    }

    struct StubIssuer;

    fn credential(expires_at: DateTime<Utc>) -> SessionCredential {
        SessionCredential {
            token: Secret::new("token".to_owned()),
            secondary_token: None,
            tertiary_token: None,
            expires_at,
        }
    }

    #[async_trait]
    impl CredentialIssuer for StubIssuer {
        async fn issue(&self, _fingerprint: &str) -> Result<Option<SessionCredential>, PoolError> {
            Ok(Some(credential(Utc::now() + chrono::Duration::minutes(30))))
        }
    }

    fn model(id: i64) -> Persona::Model {
        let now = Utc::now();
        Persona::Model {
            id,
            fingerprint: format!("fp-{id}"),
            health_score: 100,
            state: PersonaState::Available,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_one_tick_takes_a_cold_pool_to_idle() {
        let pool = Arc::new(Mutex::new(PersonaPool::new(<_>::default())));
        let store = StubStore {
            available: vec![model(1), model(2)],
        };
        let config = PersonaPoolConfigStore {
            issuer: personapool_common::IssuerConfig {
                delay: Duration::ZERO,
                ..<_>::default()
            },
            ..<_>::default()
        };

        housekeeping_tick(&pool, &store, &StubLock, &StubIssuer, &config, 1).await;

        let pool = pool.lock().await;
        assert!(pool.is_initialized());
        let stats = pool.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.idle, 2);
    }
}
