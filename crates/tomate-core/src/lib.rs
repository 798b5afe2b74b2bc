//! # Tomate Core Library
//!
//! Core logic for the Tomate pomodoro timer. The design is CLI-first:
//! every operation is available through the library API, and the CLI
//! binary is a thin layer over it.
//!
//! ## Architecture
//!
//! - **Timer Engine**: a wall-clock-based state machine; callers feed it
//!   absolute timestamps, so missed ticks and system sleep are absorbed
//!   by accounting instead of special cases
//! - **Coordinator**: serializes engine access between the background
//!   ticking task and foreground callers, and publishes ordered events
//! - **Storage**: SQLite-backed session history and TOML configuration
//! - **State / Recovery**: periodic JSON snapshots plus the startup
//!   reconciliation that turns a crash into an explicit decision
//!
//! ## Key Components
//!
//! - [`TimerEngine`]: core timer state machine
//! - [`TimerCoordinator`]: thread-safe handle with background ticking
//! - [`SessionDb`]: session history persistence and statistics
//! - [`Config`]: application configuration management
//! - [`RecoveryManager`]: crash recovery against the session sink

pub mod coordinator;
pub mod error;
pub mod events;
pub mod profile;
pub mod recovery;
pub mod state;
pub mod storage;
pub mod timer;

pub use coordinator::{CoordinatorConfig, TimerCoordinator};
pub use error::{ConfigError, CoreError, PersistenceError, SinkError, TimerError};
pub use events::Event;
pub use profile::TimerProfile;
pub use recovery::{PendingRecovery, RecoveryManager, RecoveryResolution};
pub use state::{PersistedState, StateStore};
pub use storage::{Config, SessionDb, SessionSink, Stats};
pub use timer::{EngineSnapshot, Phase, SessionType, TimerEngine};
