use std::sync::Arc;

use anyhow::Result;
use personapool_common::PersonaPoolConfig;
use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;
use tracing::*;

use crate::db::connect_to_db;
use crate::housekeeper::run_housekeeper;
use crate::issuer::{CredentialIssuer, HttpCredentialIssuer};
use crate::lock::{DatabaseLock, WarmUpLock};
use crate::pool::PersonaPool;
use crate::store::{DatabasePersonaStore, PersonaStore};
use crate::warmup::warm_up;

#[derive(Clone)]
pub struct Services {
    pub db: Arc<Mutex<DatabaseConnection>>,
    pub config: Arc<Mutex<PersonaPoolConfig>>,
    pub pool: Arc<Mutex<PersonaPool>>,
    pub store: Arc<dyn PersonaStore + Send + Sync>,
    pub lock: Arc<dyn WarmUpLock + Send + Sync>,
    pub issuer: Arc<dyn CredentialIssuer + Send + Sync>,
}

impl Services {
    pub async fn new(config: PersonaPoolConfig) -> Result<Self> {
        let db = connect_to_db(&config).await?;
        let db = Arc::new(Mutex::new(db));

        let pool = Arc::new(Mutex::new(PersonaPool::new(config.store.pool.clone())));
        let store: Arc<dyn PersonaStore + Send + Sync> =
            Arc::new(DatabasePersonaStore::new(db.clone()));
        let lock: Arc<dyn WarmUpLock + Send + Sync> = Arc::new(DatabaseLock::new(db.clone()));
        let issuer: Arc<dyn CredentialIssuer + Send + Sync> =
            Arc::new(HttpCredentialIssuer::new(&config.store.issuer)?);

        if let Err(error) = warm_up(&pool, store.as_ref(), lock.as_ref(), &config.store.warmup).await
        {
            error!(%error, "Initial warm-up failed, the housekeeper will retry");
        }

        if config.store.housekeeper.enabled {
            tokio::spawn(run_housekeeper(
                pool.clone(),
                store.clone(),
                lock.clone(),
                issuer.clone(),
                config.store.clone(),
            ));
        }

        Ok(Self {
            db,
            config: Arc::new(Mutex::new(config)),
            pool,
            store,
            lock,
            issuer,
        })
    }
}
