use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use personapool_common::{PersonaPoolConfig, PersonaPoolConfigStore};
use tracing::*;

pub fn load_config(path: &Path) -> Result<PersonaPoolConfig> {
    let store: PersonaPoolConfigStore = Config::builder()
        .add_source(File::from(path))
        .add_source(Environment::with_prefix("PERSONAPOOL"))
        .build()
        .context("Could not load config")?
        .try_deserialize()
        .context("Could not parse config")?;

    let config = PersonaPoolConfig {
        store,
        paths_relative_to: path
            .parent()
            .context("Config path has no parent directory")?
            .to_path_buf(),
    };

    info!(
        "Using config: {path:?} (listen: {}, max tokens: {})",
        config.store.http.listen, config.store.pool.max_tokens,
    );
    Ok(config)
}
