use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use personapool_common::{PersonaStatus, PoolError};
use personapool_db_entities::Persona::{self, PersonaState};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use tokio::sync::Mutex;

/// Cache-side fields the reconciler pushes back to the system of record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaUpdate {
    pub id: i64,
    pub state: PersonaState,
    pub health_score: i32,
}

/// Durable store contract. The pool is a derived, ephemeral working set;
/// this is its system of record.
#[async_trait]
pub trait PersonaStore {
    async fn find_available(&self) -> Result<Vec<Persona::Model>, PoolError>;
    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Persona::Model>, PoolError>;
    async fn persist_all(&self, updates: &[PersonaUpdate]) -> Result<(), PoolError>;
}

/// Durable state a pool status maps onto. Blocked is never produced here;
/// it is set only by explicit operator action.
pub fn durable_state(status: PersonaStatus) -> PersonaState {
    match status {
        PersonaStatus::Suspended => PersonaState::Suspended,
        _ => PersonaState::Available,
    }
}

pub struct DatabasePersonaStore {
    db: Arc<Mutex<DatabaseConnection>>,
}

impl DatabasePersonaStore {
    pub fn new(db: Arc<Mutex<DatabaseConnection>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PersonaStore for DatabasePersonaStore {
    async fn find_available(&self) -> Result<Vec<Persona::Model>, PoolError> {
        let db = self.db.lock().await;
        Ok(Persona::Entity::find()
            .filter(Persona::Column::State.eq(PersonaState::Available))
            .all(&*db)
            .await?)
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Persona::Model>, PoolError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let db = self.db.lock().await;
        Ok(Persona::Entity::find()
            .filter(Persona::Column::Id.is_in(ids.iter().copied()))
            .all(&*db)
            .await?)
    }

    async fn persist_all(&self, updates: &[PersonaUpdate]) -> Result<(), PoolError> {
        if updates.is_empty() {
            return Ok(());
        }

        let db = self.db.lock().await;
        let txn = db.begin().await?;
        let now = Utc::now();

        for update in updates {
            Persona::Entity::update_many()
                .set(Persona::ActiveModel {
                    state: Set(update.state),
                    health_score: Set(update.health_score),
                    updated_at: Set(now),
                    ..Default::default()
                })
                .filter(Persona::Column::Id.eq(update.id))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;
        Ok(())
    }
}

/// Create a durable persona record; used by the admin API.
pub async fn insert_persona(
    db: &DatabaseConnection,
    fingerprint: String,
) -> Result<Persona::Model, PoolError> {
    let now = Utc::now();
    let values = Persona::ActiveModel {
        fingerprint: Set(fingerprint),
        health_score: Set(100),
        state: Set(PersonaState::Available),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    Ok(values.insert(db).await?)
}
