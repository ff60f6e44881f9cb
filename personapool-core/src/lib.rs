pub mod db;
mod housekeeper;
mod issuer;
mod leak;
mod lock;
mod persona;
pub mod policy;
mod pool;
mod reconcile;
mod services;
mod sessions;
mod store;
mod warmup;

pub use housekeeper::{housekeeping_tick, run_housekeeper};
pub use issuer::{CredentialIssuer, HttpCredentialIssuer};
pub use leak::reclaim_leaked;
pub use lock::{DatabaseLock, WarmUpLock};
pub use persona::{BorrowedPersona, PooledPersona, ReturnDisposition};
pub use pool::PersonaPool;
pub use reconcile::reconcile;
pub use services::Services;
pub use sessions::{issue_credentials, IssueSweepStats};
pub use store::{durable_state, insert_persona, DatabasePersonaStore, PersonaStore, PersonaUpdate};
pub use warmup::{warm_up, WARM_UP_LOCK_KEY};
