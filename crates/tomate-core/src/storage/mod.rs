mod config;
pub mod database;

pub use config::{Config, PersistenceConfig, ProfileConfig};
pub use database::{SessionDb, SessionSink, Stats};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the data directory (`~/.config/tomate` by default).
///
/// `TOMATE_DATA_DIR` overrides the location entirely, which also gives
/// tests an isolated directory.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("TOMATE_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::home_dir()
            .ok_or_else(|| ConfigError::DataDir("no home directory".into()))?
            .join(".config")
            .join("tomate"),
    };
    std::fs::create_dir_all(&dir).map_err(|err| ConfigError::DataDir(err.to_string()))?;
    Ok(dir)
}
