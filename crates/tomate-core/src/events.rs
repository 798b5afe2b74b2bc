use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::PersistedState;
use crate::timer::SessionType;

/// Every lifecycle change in the engine produces an Event.
///
/// The coordinator publishes events under its critical section so
/// consumers observe them in mutation order; delivery itself happens
/// on the consumer's schedule (they drain the channel independently).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SessionStarted {
        session_type: SessionType,
        planned_seconds: u64,
        profile_name: String,
        at: DateTime<Utc>,
    },
    SessionTick {
        session_type: SessionType,
        remaining_seconds: f64,
        at: DateTime<Utc>,
    },
    /// Planned duration was lengthened by one extend increment.
    SessionExtended {
        session_type: SessionType,
        planned_seconds: u64,
        extend_count: u32,
        at: DateTime<Utc>,
    },
    /// A session ran its full planned duration.
    SessionCompleted {
        session_type: SessionType,
        actual_seconds: f64,
        extend_count: u32,
        at: DateTime<Utc>,
    },
    /// A session was stopped before completion; final accounting is
    /// carried here since the live state has already returned to idle.
    SessionStopped {
        session_type: SessionType,
        actual_seconds: f64,
        extend_count: u32,
        at: DateTime<Utc>,
    },
    /// A stale non-idle snapshot matched an unterminated sink row at
    /// startup; an external caller must resolve it.
    RecoveryNeeded {
        session_id: i64,
        snapshot: PersistedState,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// Session boundary events must be snapshotted immediately: the
    /// next launch must never see a live session that already ended,
    /// nor miss one that already started.
    pub fn forces_snapshot(&self) -> bool {
        matches!(
            self,
            Event::SessionStarted { .. }
                | Event::SessionCompleted { .. }
                | Event::SessionStopped { .. }
        )
    }
}
