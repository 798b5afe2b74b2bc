//! Core error types for tomate-core.
//!
//! Engine-level failures are always typed and recoverable; persistence
//! and sink failures never compromise the timer's in-memory correctness.

use std::path::PathBuf;
use thiserror::Error;

use crate::timer::Phase;

/// Core error type for tomate-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Timer state machine rejected an operation
    #[error("Timer error: {0}")]
    Timer(#[from] TimerError),

    /// Snapshot file could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Session sink rejected or failed a write
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by the timer engine itself.
///
/// These are always recoverable: the caller checks `snapshot().phase`
/// or simply ignores the rejected operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// An operation was issued while the phase disallows it
    #[error("cannot {operation} while {phase:?}")]
    InvalidTransition {
        operation: &'static str,
        phase: Phase,
    },
}

/// Snapshot-file persistence errors. Non-fatal: the engine keeps
/// running in memory and recovery is skipped on the next launch.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Failed to write the snapshot file
    #[error("Failed to write snapshot at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to read the snapshot file
    #[error("Failed to read snapshot at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot file exists but does not parse
    #[error("Corrupt snapshot at {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

/// Session sink errors. Non-fatal to the timer: lifecycle events are
/// dropped with a logged warning since statistics are supplementary.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Failed to open the sink database
    #[error("Failed to open session sink at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Sink query failed: {0}")]
    QueryFailed(String),

    /// Sink database is locked
    #[error("Session sink is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// A profile name that does not exist in the config
    #[error("Unknown timer profile: {0}")]
    UnknownProfile(String),

    /// Missing or undeterminable data directory
    #[error("Cannot determine data directory: {0}")]
    DataDir(String),
}

impl From<rusqlite::Error> for SinkError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _msg) => {
                if inner.code == rusqlite::ErrorCode::DatabaseLocked {
                    SinkError::Locked
                } else {
                    SinkError::QueryFailed(err.to_string())
                }
            }
            _ => SinkError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
