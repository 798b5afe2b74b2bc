//! Durable engine state for crash recovery.
//!
//! The snapshot file is the sole recovery artifact, never the
//! authoritative statistics record. Writes go to a temporary file in
//! the same directory followed by an atomic rename, so a crash
//! mid-write leaves either the previous complete snapshot or the new
//! one - never a truncated file.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::timer::{EngineSnapshot, Phase, SessionType};

/// The flat snapshot record written to disk.
///
/// Session fields are populated only while `phase != Idle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub phase: Phase,
    #[serde(default)]
    pub session_type: Option<SessionType>,
    #[serde(default)]
    pub planned_seconds: Option<u64>,
    #[serde(default)]
    pub active_accum_seconds: Option<f64>,
    #[serde(default)]
    pub start_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extend_count: Option<u32>,
    pub pomodoros_completed_since_long_break: u32,
    #[serde(default)]
    pub long_break_due: bool,
    /// Type of the last session that ran to completion; feeds the
    /// next-session suggestion across process boundaries.
    #[serde(default)]
    pub last_completed: Option<SessionType>,
    #[serde(default)]
    pub profile_name: Option<String>,
    /// Sink row id of the in-flight session, if the sink accepted it.
    #[serde(default)]
    pub session_id: Option<i64>,
    pub last_saved_at: DateTime<Utc>,
}

impl PersistedState {
    /// Flatten an engine snapshot into the durable record.
    pub fn from_snapshot(
        snapshot: &EngineSnapshot,
        session_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        let session = snapshot.session.as_ref();
        Self {
            phase: snapshot.phase,
            session_type: session.map(|s| s.session_type),
            planned_seconds: session.map(|s| s.planned_seconds),
            active_accum_seconds: session.map(|s| s.active_accum_seconds),
            start_timestamp: session.map(|s| s.start_timestamp),
            extend_count: session.map(|s| s.extend_count),
            pomodoros_completed_since_long_break: snapshot
                .pomodoros_completed_since_long_break,
            long_break_due: snapshot.long_break_due,
            last_completed: snapshot.last_completed,
            profile_name: snapshot.profile_name.clone(),
            session_id,
            last_saved_at: now,
        }
    }

    /// An idle record that keeps the pomodoro cadence but carries no
    /// session. Written after orderly shutdown and after recovery
    /// resolution so the next launch sees nothing to reconcile.
    pub fn idle(pomodoros: u32, profile_name: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            phase: Phase::Idle,
            session_type: None,
            planned_seconds: None,
            active_accum_seconds: None,
            start_timestamp: None,
            extend_count: None,
            pomodoros_completed_since_long_break: pomodoros,
            long_break_due: false,
            last_completed: None,
            profile_name,
            session_id: None,
            last_saved_at: now,
        }
    }

    pub fn remaining_seconds(&self) -> f64 {
        match (self.planned_seconds, self.active_accum_seconds) {
            (Some(planned), Some(accum)) => (planned as f64 - accum).max(0.0),
            _ => 0.0,
        }
    }
}

/// File-backed store for [`PersistedState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last snapshot. A missing file means "no prior session"
    /// and is not an error; a file that fails to parse is.
    pub fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(PersistenceError::ReadFailed {
                    path: self.path.clone(),
                    source: err,
                })
            }
        };
        let state = serde_json::from_str(&content).map_err(|err| PersistenceError::Corrupt {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        Ok(Some(state))
    }

    /// Persist a snapshot with write-to-temp-then-rename discipline.
    pub fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(state).map_err(|err| {
            PersistenceError::Corrupt {
                path: self.path.clone(),
                message: err.to_string(),
            }
        })?;
        let tmp = self.path.with_extension("json.tmp");
        let io = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&tmp, &json)?;
            fs::rename(&tmp, &self.path)
        })();
        io.map_err(|err| PersistenceError::WriteFailed {
            path: self.path.clone(),
            source: err,
        })
    }

    /// Remove the snapshot file entirely. Absence is fine.
    pub fn clear(&self) -> Result<(), PersistenceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PersistenceError::WriteFailed {
                path: self.path.clone(),
                source: err,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::TimerProfile;
    use crate::timer::TimerEngine;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        "2026-01-05T09:00:00Z".parse().unwrap()
    }

    fn store_in(dir: &tempfile::TempDir) -> StateStore {
        StateStore::new(dir.path().join("timer_state.json"))
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(
            store.load(),
            Err(PersistenceError::Corrupt { .. })
        ));
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.clear().unwrap();
        store
            .save(&PersistedState::idle(0, None, t0()))
            .unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn roundtrip_preserves_remaining_seconds() {
        let mut engine = TimerEngine::new();
        engine
            .start(crate::timer::SessionType::Work, TimerProfile::default(), t0())
            .unwrap();
        for i in 1..=600 {
            engine.tick(t0() + Duration::seconds(i));
        }
        let snapshot = engine.snapshot();
        let state = PersistedState::from_snapshot(&snapshot, Some(7), t0() + Duration::seconds(600));

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&state).unwrap();
        let loaded = store.load().unwrap().unwrap();

        assert_eq!(loaded.remaining_seconds(), snapshot.remaining_seconds);
        assert_eq!(loaded.session_id, Some(7));
        assert_eq!(loaded.phase, Phase::Active);

        // And the engine restored from it agrees.
        let restored = TimerEngine::restore(&loaded, Some(TimerProfile::default()));
        assert_eq!(
            restored.snapshot().remaining_seconds,
            snapshot.remaining_seconds
        );
    }

    #[test]
    fn roundtrip_preserves_next_session_suggestion() {
        use crate::timer::SessionType;

        let mut engine = TimerEngine::new();
        engine
            .start(SessionType::Work, TimerProfile::default(), t0())
            .unwrap();
        engine.tick(t0() + Duration::seconds(1500));
        assert_eq!(
            engine.suggested_next_session_type(),
            SessionType::ShortBreak
        );

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .save(&PersistedState::from_snapshot(
                &engine.snapshot(),
                None,
                t0() + Duration::seconds(1500),
            ))
            .unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.last_completed, Some(SessionType::Work));

        // A new process restoring from the snapshot still suggests the
        // break the completion earned.
        let restored = TimerEngine::restore(&loaded, Some(TimerProfile::default()));
        assert_eq!(
            restored.suggested_next_session_type(),
            SessionType::ShortBreak
        );
    }

    #[test]
    fn roundtrip_preserves_long_break_due() {
        use crate::timer::SessionType;

        let mut engine = TimerEngine::new();
        let mut at = t0();
        for _ in 0..4 {
            engine
                .start(SessionType::Work, TimerProfile::default(), at)
                .unwrap();
            at = at + Duration::seconds(1500);
            engine.tick(at);
        }
        assert_eq!(engine.suggested_next_session_type(), SessionType::LongBreak);

        let state = PersistedState::from_snapshot(&engine.snapshot(), None, at);
        assert!(state.long_break_due);

        // Even without the profile the flag survives the round-trip.
        let restored = TimerEngine::restore(&state, None);
        assert_eq!(
            restored.suggested_next_session_type(),
            SessionType::LongBreak
        );
        assert_eq!(restored.pomodoros_completed_since_long_break(), 4);
    }

    #[test]
    fn save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&PersistedState::idle(1, None, t0())).unwrap();
        store
            .save(&PersistedState::idle(2, Some("default".into()), t0()))
            .unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.pomodoros_completed_since_long_break, 2);
        assert_eq!(loaded.profile_name.as_deref(), Some("default"));
    }
}
