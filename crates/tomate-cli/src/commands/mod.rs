pub mod config;
pub mod run;
pub mod stats;
pub mod timer;

use tomate_core::storage::data_dir;
use tomate_core::SessionDb;

/// Open the session database at its standard location.
pub fn open_db() -> Result<SessionDb, Box<dyn std::error::Error>> {
    Ok(SessionDb::open(data_dir()?.join("sessions.db"))?)
}

/// Standard snapshot file location.
pub fn snapshot_path() -> Result<std::path::PathBuf, Box<dyn std::error::Error>> {
    Ok(data_dir()?.join("timer_state.json"))
}
