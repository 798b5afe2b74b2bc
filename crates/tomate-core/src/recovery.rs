//! Startup reconciliation between the snapshot file and the session sink.
//!
//! A crash leaves two traces: a non-idle snapshot and a sink row with
//! no end time. When both are present and agree on the session's start
//! timestamp, the session is orphaned and an external caller must
//! decide what to do with it; the core never guesses.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CoreError;
use crate::state::{PersistedState, StateStore};
use crate::storage::SessionSink;
use crate::timer::Phase;

/// An orphaned session awaiting an external decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRecovery {
    pub session_id: i64,
    pub snapshot: PersistedState,
}

/// The two allowed resolutions for an orphaned session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum RecoveryResolution {
    /// End the sink row at `start + planned` with `actual = planned`;
    /// the caller chooses whether it counts as completed.
    MarkComplete { completed: bool },
    /// Delete the sink row.
    Discard,
}

/// Drives startup recovery against a snapshot store and a sink.
pub struct RecoveryManager {
    store: StateStore,
    sink: Arc<dyn SessionSink>,
    /// Snapshots older than this are discarded rather than recovered.
    stale_after: Duration,
}

impl RecoveryManager {
    pub fn new(store: StateStore, sink: Arc<dyn SessionSink>, stale_after: Duration) -> Self {
        Self {
            store,
            sink,
            stale_after,
        }
    }

    /// Inspect the last snapshot and decide whether recovery is needed.
    ///
    /// Returns `Ok(None)` when there is nothing to reconcile: no
    /// snapshot, an idle one, a stale one, or no matching sink row.
    /// Every no-op path that consumed a non-idle snapshot rewrites it
    /// as idle so the question is not asked twice.
    pub fn check(&self, now: DateTime<Utc>) -> Result<Option<PendingRecovery>, CoreError> {
        let Some(snapshot) = self.store.load()? else {
            return Ok(None);
        };
        if snapshot.phase == Phase::Idle {
            return Ok(None);
        }

        if now - snapshot.last_saved_at > self.stale_after {
            tracing::info!(
                saved_at = %snapshot.last_saved_at,
                "discarding stale snapshot"
            );
            self.settle(&snapshot, now)?;
            return Ok(None);
        }

        let Some(start_timestamp) = snapshot.start_timestamp else {
            self.settle(&snapshot, now)?;
            return Ok(None);
        };

        match self.sink.find_unterminated_session(start_timestamp)? {
            Some(session_id) => Ok(Some(PendingRecovery {
                session_id,
                snapshot,
            })),
            None => {
                // The sink already saw the session end (or never saw it
                // start); only the snapshot is out of date.
                self.settle(&snapshot, now)?;
                Ok(None)
            }
        }
    }

    /// Apply the caller's decision and settle the snapshot to idle.
    pub fn resolve(
        &self,
        pending: &PendingRecovery,
        resolution: RecoveryResolution,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        match resolution {
            RecoveryResolution::MarkComplete { completed } => {
                let planned = pending.snapshot.planned_seconds.unwrap_or(0);
                let start = pending
                    .snapshot
                    .start_timestamp
                    .unwrap_or(pending.snapshot.last_saved_at);
                let end = start + Duration::seconds(planned as i64);
                self.sink.record_session_end(
                    pending.session_id,
                    end,
                    planned as f64,
                    completed,
                    pending.snapshot.extend_count.unwrap_or(0),
                )?;
            }
            RecoveryResolution::Discard => {
                self.sink.discard_session(pending.session_id)?;
            }
        }
        self.settle(&pending.snapshot, now)
    }

    fn settle(&self, snapshot: &PersistedState, now: DateTime<Utc>) -> Result<(), CoreError> {
        let mut idle = PersistedState::idle(
            snapshot.pomodoros_completed_since_long_break,
            snapshot.profile_name.clone(),
            now,
        );
        idle.long_break_due = snapshot.long_break_due;
        idle.last_completed = snapshot.last_completed;
        self.store.save(&idle)?;
        Ok(())
    }
}
