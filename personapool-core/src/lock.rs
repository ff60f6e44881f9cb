use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use personapool_common::PoolError;
use personapool_db_entities::PoolLock;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use tokio::sync::Mutex;
use tracing::*;
use uuid::Uuid;

/// Non-blocking, self-expiring mutual exclusion shared across process
/// replicas. A single acquisition attempt, no waiting.
#[async_trait]
pub trait WarmUpLock {
    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<bool, PoolError>;
    async fn release(&self, key: &str) -> Result<(), PoolError>;
}

/// Lock backed by a row in the durable store. An expired row may be stolen
/// by any holder; the steal is a conditional update so two replicas can
/// never both win it.
pub struct DatabaseLock {
    db: Arc<Mutex<DatabaseConnection>>,
    holder: Uuid,
}

impl DatabaseLock {
    pub fn new(db: Arc<Mutex<DatabaseConnection>>) -> Self {
        Self {
            db,
            holder: Uuid::new_v4(),
        }
    }
}

#[async_trait]
impl WarmUpLock for DatabaseLock {
    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<bool, PoolError> {
        let db = self.db.lock().await;
        let now = Utc::now();
        let expires_at = now + chrono::Duration::milliseconds(lease.as_millis() as i64);

        let existing = PoolLock::Entity::find_by_id(key.to_owned()).one(&*db).await?;

        match existing {
            None => {
                let values = PoolLock::ActiveModel {
                    key: Set(key.to_owned()),
                    holder: Set(self.holder),
                    acquired_at: Set(now),
                    expires_at: Set(expires_at),
                };
                match values.insert(&*db).await {
                    Ok(_) => {
                        debug!(%key, holder = %self.holder, "Lock acquired");
                        Ok(true)
                    }
                    Err(error) => {
                        // Lost an insert race with another replica
                        debug!(%key, %error, "Lock insert lost the race");
                        Ok(false)
                    }
                }
            }
            Some(row) if row.expires_at <= now => {
                let stolen = PoolLock::Entity::update_many()
                    .set(PoolLock::ActiveModel {
                        holder: Set(self.holder),
                        acquired_at: Set(now),
                        expires_at: Set(expires_at),
                        ..Default::default()
                    })
                    .filter(PoolLock::Column::Key.eq(key))
                    .filter(PoolLock::Column::ExpiresAt.lte(now))
                    .exec(&*db)
                    .await?;

                let acquired = stolen.rows_affected == 1;
                if acquired {
                    info!(%key, holder = %self.holder, "Expired lock reclaimed");
                }
                Ok(acquired)
            }
            Some(_) => Ok(false),
        }
    }

    async fn release(&self, key: &str) -> Result<(), PoolError> {
        let db = self.db.lock().await;
        PoolLock::Entity::delete_many()
            .filter(PoolLock::Column::Key.eq(key))
            .filter(PoolLock::Column::Holder.eq(self.holder))
            .exec(&*db)
            .await?;
        debug!(%key, holder = %self.holder, "Lock released");
        Ok(())
    }
}
