//! SQLite-backed session sink.
//!
//! The sink receives session lifecycle events for statistics logging.
//! It is supplementary: the timer never depends on it for correctness,
//! and the only read paths are the stats aggregates and the recovery
//! lookup for unterminated rows.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::SinkError;
use crate::timer::SessionType;

/// Where the coordinator logs session lifecycle facts.
///
/// Implementations must tolerate being called from multiple contexts;
/// all methods are short, local writes or point reads.
pub trait SessionSink: Send + Sync {
    /// Insert a started session, returning its row id.
    fn record_session_start(
        &self,
        session_type: SessionType,
        planned_seconds: u64,
        profile_name: &str,
        start_timestamp: DateTime<Utc>,
    ) -> Result<i64, SinkError>;

    /// Close a session row with its final accounting.
    fn record_session_end(
        &self,
        session_id: i64,
        end_timestamp: DateTime<Utc>,
        actual_seconds: f64,
        completed: bool,
        extend_count: u32,
    ) -> Result<(), SinkError>;

    /// Bump the extend counter on an open session row.
    fn record_extend(&self, session_id: i64) -> Result<(), SinkError>;

    /// Recovery lookup: a row started at exactly `start_timestamp`
    /// with no end time.
    fn find_unterminated_session(
        &self,
        start_timestamp: DateTime<Utc>,
    ) -> Result<Option<i64>, SinkError>;

    /// Drop a row entirely (recovery "discard" resolution).
    fn discard_session(&self, session_id: i64) -> Result<(), SinkError>;
}

/// Aggregate statistics over recorded sessions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Stats {
    pub completed_pomodoros: u64,
    pub total_work_sessions: u64,
    pub work_seconds: u64,
    pub completed_breaks: u64,
    pub total_extends: u64,
}

/// SQLite session store.
pub struct SessionDb {
    conn: Mutex<Connection>,
}

impl SessionDb {
    /// Open (and migrate) the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path: PathBuf = path.as_ref().into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                SinkError::QueryFailed(format!("cannot create {}: {err}", parent.display()))
            })?;
        }
        let conn = Connection::open(&path).map_err(|source| SinkError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (tests and dry runs).
    pub fn open_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SinkError> {
        self.conn
            .lock()
            .map_err(|_| SinkError::QueryFailed("sink connection lock poisoned".into()))
    }

    fn migrate(&self) -> Result<(), SinkError> {
        self.lock()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                session_type     TEXT NOT NULL,
                start_time       TEXT NOT NULL,
                end_time         TEXT,
                planned_duration INTEGER NOT NULL,
                actual_duration  INTEGER,
                completed        BOOLEAN DEFAULT 0,
                extend_count     INTEGER DEFAULT 0,
                profile_name     TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_start_time ON sessions(start_time);
            CREATE INDEX IF NOT EXISTS idx_sessions_session_type ON sessions(session_type);",
        )?;
        Ok(())
    }

    /// Today's aggregates (UTC day boundary).
    pub fn stats_today(&self) -> Result<Stats, SinkError> {
        let midnight = format!("{}T00:00:00+00:00", Utc::now().format("%Y-%m-%d"));
        self.stats_where("WHERE start_time >= ?1", params![midnight])
    }

    /// All-time aggregates.
    pub fn stats_all(&self) -> Result<Stats, SinkError> {
        self.stats_where("", params![])
    }

    fn stats_where(
        &self,
        filter: &str,
        filter_params: &[&dyn rusqlite::ToSql],
    ) -> Result<Stats, SinkError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT
                COUNT(CASE WHEN session_type = 'work' AND completed = 1 THEN 1 END),
                COUNT(CASE WHEN session_type = 'work' THEN 1 END),
                COALESCE(SUM(CASE WHEN session_type = 'work' AND completed = 1
                                  THEN actual_duration END), 0),
                COUNT(CASE WHEN session_type IN ('short_break', 'long_break')
                            AND completed = 1 THEN 1 END),
                COALESCE(SUM(extend_count), 0)
             FROM sessions {filter}"
        );
        let stats = conn.query_row(&sql, filter_params, |row| {
            Ok(Stats {
                completed_pomodoros: row.get(0)?,
                total_work_sessions: row.get(1)?,
                work_seconds: row.get(2)?,
                completed_breaks: row.get(3)?,
                total_extends: row.get(4)?,
            })
        })?;
        Ok(stats)
    }
}

impl SessionSink for SessionDb {
    fn record_session_start(
        &self,
        session_type: SessionType,
        planned_seconds: u64,
        profile_name: &str,
        start_timestamp: DateTime<Utc>,
    ) -> Result<i64, SinkError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (session_type, start_time, planned_duration, extend_count, profile_name)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![
                session_type.as_str(),
                start_timestamp.to_rfc3339(),
                planned_seconds,
                profile_name,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn record_session_end(
        &self,
        session_id: i64,
        end_timestamp: DateTime<Utc>,
        actual_seconds: f64,
        completed: bool,
        extend_count: u32,
    ) -> Result<(), SinkError> {
        self.lock()?.execute(
            "UPDATE sessions
             SET end_time = ?1, actual_duration = ?2, completed = ?3, extend_count = ?4
             WHERE id = ?5",
            params![
                end_timestamp.to_rfc3339(),
                actual_seconds.round() as i64,
                completed,
                extend_count,
                session_id,
            ],
        )?;
        Ok(())
    }

    fn record_extend(&self, session_id: i64) -> Result<(), SinkError> {
        self.lock()?.execute(
            "UPDATE sessions SET extend_count = extend_count + 1 WHERE id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    fn find_unterminated_session(
        &self,
        start_timestamp: DateTime<Utc>,
    ) -> Result<Option<i64>, SinkError> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "SELECT id FROM sessions
                 WHERE start_time = ?1 AND end_time IS NULL
                 ORDER BY id DESC LIMIT 1",
                params![start_timestamp.to_rfc3339()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn discard_session(&self, session_id: i64) -> Result<(), SinkError> {
        self.lock()?
            .execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        "2026-01-05T09:00:00Z".parse().unwrap()
    }

    #[test]
    fn start_and_end_session() {
        let db = SessionDb::open_memory().unwrap();
        let id = db
            .record_session_start(SessionType::Work, 1500, "default", t0())
            .unwrap();
        assert!(id > 0);

        db.record_session_end(id, t0() + chrono::Duration::seconds(1500), 1500.0, true, 0)
            .unwrap();
        assert!(db.find_unterminated_session(t0()).unwrap().is_none());

        let stats = db.stats_all().unwrap();
        assert_eq!(stats.completed_pomodoros, 1);
        assert_eq!(stats.work_seconds, 1500);
    }

    #[test]
    fn unterminated_row_is_found_by_start_time() {
        let db = SessionDb::open_memory().unwrap();
        let id = db
            .record_session_start(SessionType::Work, 1500, "default", t0())
            .unwrap();
        assert_eq!(db.find_unterminated_session(t0()).unwrap(), Some(id));
        // Different start time does not match.
        assert!(db
            .find_unterminated_session(t0() + chrono::Duration::seconds(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn discard_removes_the_row() {
        let db = SessionDb::open_memory().unwrap();
        let id = db
            .record_session_start(SessionType::ShortBreak, 300, "default", t0())
            .unwrap();
        db.discard_session(id).unwrap();
        assert!(db.find_unterminated_session(t0()).unwrap().is_none());
        assert_eq!(db.stats_all().unwrap().total_work_sessions, 0);
    }

    #[test]
    fn extends_are_counted() {
        let db = SessionDb::open_memory().unwrap();
        let id = db
            .record_session_start(SessionType::Work, 1500, "default", t0())
            .unwrap();
        db.record_extend(id).unwrap();
        db.record_extend(id).unwrap();
        assert_eq!(db.stats_all().unwrap().total_extends, 2);
    }

    #[test]
    fn stopped_sessions_do_not_count_as_pomodoros() {
        let db = SessionDb::open_memory().unwrap();
        let id = db
            .record_session_start(SessionType::Work, 1500, "default", t0())
            .unwrap();
        db.record_session_end(id, t0() + chrono::Duration::seconds(90), 90.0, false, 0)
            .unwrap();
        let stats = db.stats_all().unwrap();
        assert_eq!(stats.completed_pomodoros, 0);
        assert_eq!(stats.total_work_sessions, 1);
    }
}
