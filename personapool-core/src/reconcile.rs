use std::collections::HashMap;
use std::sync::Arc;

use personapool_common::{PersonaStatus, PoolError};
use personapool_db_entities::Persona::PersonaState;
use tokio::sync::Mutex;
use tracing::*;

use crate::pool::PersonaPool;
use crate::store::{durable_state, PersonaStore, PersonaUpdate};

/// Converge the durable store onto the cache's externally-visible state
/// (durable state mapping and health score). Divergent records are written
/// in one batch; IDs present on only one side are skipped. Returns the
/// number of records persisted.
pub async fn reconcile(
    pool: &Arc<Mutex<PersonaPool>>,
    store: &(dyn PersonaStore + Send + Sync),
) -> Result<usize, PoolError> {
    let cached: Vec<(i64, PersonaStatus, i32)> = {
        let pool = pool.lock().await;
        pool.personas()
            .map(|p| (p.id, p.status, p.health_score))
            .collect()
    };

    if cached.is_empty() {
        return Ok(0);
    }

    let ids: Vec<i64> = cached.iter().map(|(id, _, _)| *id).collect();
    let durable: HashMap<i64, _> = store
        .find_by_ids(&ids)
        .await?
        .into_iter()
        .map(|record| (record.id, record))
        .collect();

    let mut drifted = Vec::new();
    for (id, status, health_score) in cached {
        let Some(record) = durable.get(&id) else {
            continue;
        };
        // The durable Blocked state is owned by the operator, never
        // overwritten from the cache.
        if record.state == PersonaState::Blocked {
            continue;
        }

        let expected = durable_state(status);
        if record.state != expected || record.health_score != health_score {
            drifted.push(PersonaUpdate {
                id,
                state: expected,
                health_score,
            });
        }
    }

    if drifted.is_empty() {
        return Ok(0);
    }

    store.persist_all(&drifted).await?;
    info!(personas = drifted.len(), "Reconciled cache drift to durable store");
    Ok(drifted.len())
}
