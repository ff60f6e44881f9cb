use std::sync::Arc;

use personapool_common::{PoolError, WarmUpConfig};
use tokio::sync::Mutex;
use tracing::*;

use crate::lock::WarmUpLock;
use crate::pool::PersonaPool;
use crate::store::PersonaStore;

pub const WARM_UP_LOCK_KEY: &str = "persona-pool-warmup";

/// One-time population of the working set from the durable store.
///
/// Mutually exclusive across process replicas via the self-expiring lock;
/// replicas that lose the lock skip. A pool that warms up to zero personas
/// is still marked initialized so restarts stop contending for the lock.
/// Returns the number of personas admitted.
pub async fn warm_up(
    pool: &Arc<Mutex<PersonaPool>>,
    store: &(dyn PersonaStore + Send + Sync),
    lock: &(dyn WarmUpLock + Send + Sync),
    config: &WarmUpConfig,
) -> Result<usize, PoolError> {
    if pool.lock().await.is_initialized() {
        return Ok(0);
    }

    if !lock.try_acquire(WARM_UP_LOCK_KEY, config.lock_lease).await? {
        info!("Warm-up already in progress on another replica, skipping");
        return Ok(0);
    }

    let result = populate(pool, store).await;

    if let Err(error) = lock.release(WARM_UP_LOCK_KEY).await {
        warn!(%error, "Could not release warm-up lock, it will expire on its own");
    }

    match &result {
        Ok(count) => info!(personas = count, "Pool warm-up complete"),
        Err(error) => error!(%error, "Pool warm-up failed"),
    }
    result
}

async fn populate(
    pool: &Arc<Mutex<PersonaPool>>,
    store: &(dyn PersonaStore + Send + Sync),
) -> Result<usize, PoolError> {
    let available = store.find_available().await?;

    let mut pool = pool.lock().await;
    for record in &available {
        pool.insert(record.id, record.fingerprint.clone(), record.health_score);
    }
    pool.mark_initialized();
    Ok(available.len())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use personapool_common::PoolConfig;
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

        async fn find_by_ids(&self, _ids: &[i64]) -> Result<Vec<Persona::Model>, PoolError> {
            Ok(vec![])
        }

        async fn persist_all(&self, _updates: &[PersonaUpdate]) -> Result<(), PoolError> {
            Ok(())
        }
    }

    struct StubLock {
        grant: bool,
        acquired: AtomicBool,
        released: AtomicBool,
    }

    impl StubLock {
        fn granting(grant: bool) -> Self {
            Self {
                grant,
                acquired: AtomicBool::new(false),
                released: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl WarmUpLock for StubLock {
        async fn try_acquire(&self, _key: &str, _lease: Duration) -> Result<bool, PoolError> {
            self.acquired.store(true, Ordering::SeqCst);
            Ok(self.grant)
        }

        async fn release(&self, _key: &str) -> Result<(), PoolError> {
            self.released.store(true, Ordering::SeqCst);
            Ok(())
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

    fn empty_pool() -> Arc<Mutex<PersonaPool>> {
        Arc::new(Mutex::new(PersonaPool::new(PoolConfig::default())))
    }

    #[tokio::test]
    async fn test_warm_up_populates_and_marks_initialized() {
        let pool = empty_pool();
        let store = StubStore {
            available: vec![model(1), model(2)],
        };
        let lock = StubLock::granting(true);

        let count = warm_up(&pool, &store, &lock, &WarmUpConfig::default())
            .await
            .unwrap();

        assert_eq!(count, 2);
        let pool = pool.lock().await;
        assert!(pool.is_initialized());
        assert_eq!(pool.len(), 2);
        assert!(lock.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_warm_up_with_zero_personas_still_initializes() {
        let pool = empty_pool();
        let store = StubStore { available: vec![] };
        let lock = StubLock::granting(true);

        let count = warm_up(&pool, &store, &lock, &WarmUpConfig::default())
            .await
            .unwrap();

        assert_eq!(count, 0);
        assert!(pool.lock().await.is_initialized());
    }

    #[tokio::test]
    async fn test_warm_up_skips_when_lock_unavailable() {
        let pool = empty_pool();
        let store = StubStore {
            available: vec![model(1)],
        };
        let lock = StubLock::granting(false);

        let count = warm_up(&pool, &store, &lock, &WarmUpConfig::default())
            .await
            .unwrap();

        assert_eq!(count, 0);
        let pool = pool.lock().await;
        assert!(!pool.is_initialized());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_warm_up_skips_when_already_initialized() {
        let pool = empty_pool();
        pool.lock().await.mark_initialized();
        let store = StubStore {
            available: vec![model(1)],
        };
        let lock = StubLock::granting(true);

        let count = warm_up(&pool, &store, &lock, &WarmUpConfig::default())
            .await
            .unwrap();

        assert_eq!(count, 0);
        assert!(!lock.acquired.load(Ordering::SeqCst));
    }
}
