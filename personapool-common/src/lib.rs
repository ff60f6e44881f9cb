mod config;
mod error;
mod types;

pub use config::*;
pub use error::PoolError;
pub use types::*;
