//! Timer engine implementation.
//!
//! The timer engine is a wall-clock-based state machine. It does not use
//! internal threads and never reads the clock itself - every operation
//! that involves time takes an explicit `now`, and the caller (normally
//! the coordinator) is responsible for invoking `tick()` periodically.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -start-> Active -pause-> Paused -resume-> Active
//! Active -tick(completion)-> Idle
//! Active | Paused -stop-> Idle
//! ```
//!
//! Phase is orthogonal to session type: pause/resume is one code path
//! regardless of whether a work or break session is running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TimerError;
use crate::events::Event;
use crate::profile::TimerProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Work,
    ShortBreak,
    LongBreak,
}

impl SessionType {
    pub fn is_break(self) -> bool {
        matches!(self, SessionType::ShortBreak | SessionType::LongBreak)
    }

    /// Stable string form used by the session sink schema.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionType::Work => "work",
            SessionType::ShortBreak => "short_break",
            SessionType::LongBreak => "long_break",
        }
    }
}

/// The engine's structural mode, orthogonal to [`SessionType`].
/// `Paused` never stands alone; it always wraps a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Active,
    Paused,
}

/// One bounded work or break interval. Exists only while Phase != Idle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_type: SessionType,
    /// Base duration plus the sum of accepted extends.
    pub planned_seconds: u64,
    /// Time counted while Active. Paused intervals are excluded by
    /// construction: the accumulator simply does not advance.
    pub active_accum_seconds: f64,
    pub start_timestamp: DateTime<Utc>,
    /// Set only while Paused.
    pub pause_started_at: Option<DateTime<Utc>>,
    pub extend_count: u32,
    /// True only when the planned duration was reached through a tick,
    /// never via `stop()`.
    pub completed: bool,
}

impl Session {
    pub fn remaining_seconds(&self) -> f64 {
        (self.planned_seconds as f64 - self.active_accum_seconds).max(0.0)
    }
}

/// Immutable value copy of the whole machine, plus derived figures.
/// Returned by [`TimerEngine::snapshot`] so consumers never observe a
/// state mid-mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub phase: Phase,
    pub session: Option<Session>,
    pub pomodoros_completed_since_long_break: u32,
    pub long_break_due: bool,
    /// Type of the last session that ran to completion; drives
    /// [`TimerEngine::suggested_next_session_type`].
    pub last_completed: Option<SessionType>,
    pub profile_name: Option<String>,
    /// `max(0, planned - active_accum)`; 0.0 while idle.
    pub remaining_seconds: f64,
    /// Equals `active_accum_seconds` for WORK sessions, absent otherwise.
    pub actual_work_seconds: Option<f64>,
}

/// Core timer engine.
///
/// Synchronous and allocation-light; all operations return immediately
/// and their side effects are visible to the caller at once. Invalid
/// operations fail with [`TimerError::InvalidTransition`] rather than
/// panicking or being silently reinterpreted.
#[derive(Debug, Clone)]
pub struct TimerEngine {
    phase: Phase,
    session: Option<Session>,
    /// Profile the current session was started with. Retained after
    /// completion so `suggested_next_session_type` can consult the
    /// long-break threshold.
    profile: Option<TimerProfile>,
    pomodoros_completed_since_long_break: u32,
    long_break_due: bool,
    last_completed: Option<SessionType>,
    /// Timestamp of the last applied tick while Active; deltas against
    /// it absorb missed ticks (system sleep) correctly.
    last_tick: Option<DateTime<Utc>>,
}

impl Default for TimerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerEngine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            session: None,
            profile: None,
            pomodoros_completed_since_long_break: 0,
            long_break_due: false,
            last_completed: None,
            last_tick: None,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pomodoros_completed_since_long_break(&self) -> u32 {
        self.pomodoros_completed_since_long_break
    }

    pub fn profile(&self) -> Option<&TimerProfile> {
        self.profile.as_ref()
    }

    /// What the next session should be, based on the last completion:
    /// a completed WORK suggests a break (long once the pomodoro
    /// threshold is reached), a completed break suggests WORK.
    pub fn suggested_next_session_type(&self) -> SessionType {
        match self.last_completed {
            Some(SessionType::Work) if self.long_break_due => SessionType::LongBreak,
            Some(SessionType::Work) => SessionType::ShortBreak,
            Some(_) | None => SessionType::Work,
        }
    }

    /// Immutable value copy of the current state.
    pub fn snapshot(&self) -> EngineSnapshot {
        let remaining = self
            .session
            .as_ref()
            .map(|s| s.remaining_seconds())
            .unwrap_or(0.0);
        let actual_work = self
            .session
            .as_ref()
            .filter(|s| s.session_type == SessionType::Work)
            .map(|s| s.active_accum_seconds);
        EngineSnapshot {
            phase: self.phase,
            session: self.session.clone(),
            pomodoros_completed_since_long_break: self.pomodoros_completed_since_long_break,
            long_break_due: self.long_break_due,
            last_completed: self.last_completed,
            profile_name: self.profile.as_ref().map(|p| p.name.clone()),
            remaining_seconds: remaining,
            actual_work_seconds: actual_work,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Begin a new session. Valid only while Idle.
    ///
    /// Starting the long break the pomodoro cadence asked for resets
    /// the counter and the long-break flag.
    pub fn start(
        &mut self,
        session_type: SessionType,
        profile: TimerProfile,
        now: DateTime<Utc>,
    ) -> Result<Event, TimerError> {
        if self.phase != Phase::Idle {
            return Err(TimerError::InvalidTransition {
                operation: "start",
                phase: self.phase,
            });
        }

        if session_type == SessionType::LongBreak {
            self.pomodoros_completed_since_long_break = 0;
            self.long_break_due = false;
        }

        let planned_seconds = profile.duration_for(session_type);
        let profile_name = profile.name.clone();
        self.session = Some(Session {
            session_type,
            planned_seconds,
            active_accum_seconds: 0.0,
            start_timestamp: now,
            pause_started_at: None,
            extend_count: 0,
            completed: false,
        });
        self.profile = Some(profile);
        self.phase = Phase::Active;
        self.last_tick = Some(now);

        Ok(Event::SessionStarted {
            session_type,
            planned_seconds,
            profile_name,
            at: now,
        })
    }

    /// Advance the accumulator by the wall-clock delta since the last
    /// applied tick. Valid in any phase; a no-op while Idle or Paused.
    ///
    /// Returns `SessionCompleted` when the planned duration is reached,
    /// `SessionTick` while counting down, `None` otherwise.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<Event> {
        if self.phase != Phase::Active {
            return None;
        }

        let session = self.session.as_mut()?;
        if let Some(last) = self.last_tick {
            let delta = (now - last).num_milliseconds() as f64 / 1000.0;
            if delta > 0.0 {
                session.active_accum_seconds += delta;
            }
        }
        self.last_tick = Some(now);

        if session.active_accum_seconds >= session.planned_seconds as f64 {
            session.completed = true;
            let finished = self.session.take().expect("session checked above");
            self.phase = Phase::Idle;
            self.last_tick = None;
            self.last_completed = Some(finished.session_type);

            if finished.session_type == SessionType::Work {
                self.pomodoros_completed_since_long_break += 1;
                let threshold = self
                    .profile
                    .as_ref()
                    .map(|p| p.pomodoros_until_long_break)
                    .unwrap_or(u32::MAX);
                if self.pomodoros_completed_since_long_break >= threshold {
                    self.long_break_due = true;
                }
            }

            return Some(Event::SessionCompleted {
                session_type: finished.session_type,
                actual_seconds: finished.active_accum_seconds,
                extend_count: finished.extend_count,
                at: now,
            });
        }

        Some(Event::SessionTick {
            session_type: session.session_type,
            remaining_seconds: session.remaining_seconds(),
            at: now,
        })
    }

    /// Suspend accounting. Valid only while Active.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), TimerError> {
        if self.phase != Phase::Active {
            return Err(TimerError::InvalidTransition {
                operation: "pause",
                phase: self.phase,
            });
        }
        // Flush the partial interval so no active time is lost.
        if let (Some(session), Some(last)) = (self.session.as_mut(), self.last_tick) {
            let delta = (now - last).num_milliseconds() as f64 / 1000.0;
            if delta > 0.0 {
                session.active_accum_seconds += delta;
            }
            session.pause_started_at = Some(now);
        }
        self.phase = Phase::Paused;
        self.last_tick = None;
        Ok(())
    }

    /// Resume accounting. Valid only while Paused. The paused interval
    /// is never added to the accumulator.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), TimerError> {
        if self.phase != Phase::Paused {
            return Err(TimerError::InvalidTransition {
                operation: "resume",
                phase: self.phase,
            });
        }
        if let Some(session) = self.session.as_mut() {
            session.pause_started_at = None;
        }
        self.phase = Phase::Active;
        self.last_tick = Some(now);
        Ok(())
    }

    /// Lengthen the current session by one increment: the override if
    /// given (minutes), otherwise the profile's type-specific amount.
    /// Valid while Active or Paused.
    pub fn extend(
        &mut self,
        minutes_override: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Event, TimerError> {
        if self.phase == Phase::Idle {
            return Err(TimerError::InvalidTransition {
                operation: "extend",
                phase: self.phase,
            });
        }
        let session = self
            .session
            .as_mut()
            .expect("non-idle phase always has a session");
        let add_seconds = match minutes_override {
            Some(minutes) => u64::from(minutes) * 60,
            None => self
                .profile
                .as_ref()
                .map(|p| p.extend_for(session.session_type))
                .unwrap_or(0),
        };
        session.planned_seconds += add_seconds;
        session.extend_count += 1;
        Ok(Event::SessionExtended {
            session_type: session.session_type,
            planned_seconds: session.planned_seconds,
            extend_count: session.extend_count,
            at: now,
        })
    }

    /// End the current session without marking it completed.
    ///
    /// Safe to call while already Idle: returns `Ok(None)` and emits
    /// nothing. The discarded session's final accounting rides on the
    /// returned event for the sink.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<Option<Event>, TimerError> {
        if self.phase == Phase::Idle {
            return Ok(None);
        }
        let session = self
            .session
            .take()
            .expect("non-idle phase always has a session");
        self.phase = Phase::Idle;
        self.last_tick = None;
        Ok(Some(Event::SessionStopped {
            session_type: session.session_type,
            actual_seconds: session.active_accum_seconds,
            extend_count: session.extend_count,
            at: now,
        }))
    }

    /// Clear the pomodoro cadence. Valid only from Idle; callers must
    /// `stop()` first.
    pub fn reset(&mut self) -> Result<(), TimerError> {
        if self.phase != Phase::Idle {
            return Err(TimerError::InvalidTransition {
                operation: "reset",
                phase: self.phase,
            });
        }
        self.pomodoros_completed_since_long_break = 0;
        self.long_break_due = false;
        self.last_completed = None;
        Ok(())
    }

    // ── Persistence bridge ───────────────────────────────────────────

    /// Restore an engine from a durable snapshot.
    ///
    /// `profile` is looked up by the caller from the snapshot's profile
    /// name; without it, extends fall back to explicit overrides. The
    /// pomodoro cadence (counter, long-break flag, last completion) is
    /// taken from the snapshot verbatim.
    ///
    /// While the snapshot was Active the interval between `last_saved_at`
    /// and the restore instant was unobserved, so the accumulator resumes
    /// from `last_saved_at` (crash recovery reconciles the gap instead).
    pub fn restore(state: &crate::state::PersistedState, profile: Option<TimerProfile>) -> Self {
        let mut engine = Self::new();
        engine.pomodoros_completed_since_long_break = state.pomodoros_completed_since_long_break;
        engine.long_break_due = state.long_break_due;
        engine.last_completed = state.last_completed;
        engine.profile = profile;
        if state.phase == Phase::Idle {
            return engine;
        }
        let (Some(session_type), Some(planned_seconds), Some(start_timestamp)) =
            (state.session_type, state.planned_seconds, state.start_timestamp)
        else {
            return engine;
        };
        engine.session = Some(Session {
            session_type,
            planned_seconds,
            active_accum_seconds: state.active_accum_seconds.unwrap_or(0.0),
            start_timestamp,
            pause_started_at: (state.phase == Phase::Paused).then_some(state.last_saved_at),
            extend_count: state.extend_count.unwrap_or(0),
            completed: false,
        });
        engine.phase = state.phase;
        engine.last_tick = (state.phase == Phase::Active).then_some(state.last_saved_at);
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        "2026-01-05T09:00:00Z".parse().unwrap()
    }

    fn profile() -> TimerProfile {
        TimerProfile::default()
    }

    /// Drive one tick per second for `seconds` starting at `from`.
    fn tick_for(engine: &mut TimerEngine, from: DateTime<Utc>, seconds: i64) -> Option<Event> {
        let mut last = None;
        for i in 1..=seconds {
            last = engine.tick(from + Duration::seconds(i));
        }
        last
    }

    #[test]
    fn start_pause_resume_stop() {
        let mut engine = TimerEngine::new();
        assert_eq!(engine.phase(), Phase::Idle);

        engine.start(SessionType::Work, profile(), t0()).unwrap();
        assert_eq!(engine.phase(), Phase::Active);

        engine.pause(t0() + Duration::seconds(10)).unwrap();
        assert_eq!(engine.phase(), Phase::Paused);

        engine.resume(t0() + Duration::seconds(20)).unwrap();
        assert_eq!(engine.phase(), Phase::Active);

        let event = engine.stop(t0() + Duration::seconds(30)).unwrap();
        assert!(matches!(event, Some(Event::SessionStopped { .. })));
        assert_eq!(engine.phase(), Phase::Idle);
    }

    #[test]
    fn start_rejected_unless_idle() {
        let mut engine = TimerEngine::new();
        engine.start(SessionType::Work, profile(), t0()).unwrap();
        let err = engine
            .start(SessionType::Work, profile(), t0())
            .unwrap_err();
        assert_eq!(
            err,
            TimerError::InvalidTransition {
                operation: "start",
                phase: Phase::Active
            }
        );
    }

    #[test]
    fn pause_rejected_while_idle_and_paused() {
        let mut engine = TimerEngine::new();
        assert!(engine.pause(t0()).is_err());
        engine.start(SessionType::Work, profile(), t0()).unwrap();
        engine.pause(t0()).unwrap();
        assert!(engine.pause(t0()).is_err());
    }

    #[test]
    fn resume_rejected_unless_paused() {
        let mut engine = TimerEngine::new();
        assert!(engine.resume(t0()).is_err());
        engine.start(SessionType::Work, profile(), t0()).unwrap();
        assert!(engine.resume(t0()).is_err());
    }

    #[test]
    fn stop_while_idle_is_silent_noop() {
        let mut engine = TimerEngine::new();
        assert!(engine.stop(t0()).unwrap().is_none());
    }

    #[test]
    fn tick_while_idle_and_paused_is_noop() {
        let mut engine = TimerEngine::new();
        assert!(engine.tick(t0()).is_none());

        engine.start(SessionType::Work, profile(), t0()).unwrap();
        engine.pause(t0() + Duration::seconds(5)).unwrap();
        assert!(engine.tick(t0() + Duration::seconds(6)).is_none());
        let accum = engine.snapshot().session.unwrap().active_accum_seconds;
        assert_eq!(accum, 5.0);
    }

    #[test]
    fn full_work_session_completes() {
        let mut engine = TimerEngine::new();
        engine.start(SessionType::Work, profile(), t0()).unwrap();
        let last = tick_for(&mut engine, t0(), 1500);
        match last {
            Some(Event::SessionCompleted {
                session_type,
                actual_seconds,
                ..
            }) => {
                assert_eq!(session_type, SessionType::Work);
                assert_eq!(actual_seconds, 1500.0);
            }
            other => panic!("expected SessionCompleted, got {other:?}"),
        }
        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.pomodoros_completed_since_long_break(), 1);
    }

    #[test]
    fn missed_ticks_are_absorbed_by_delta() {
        let mut engine = TimerEngine::new();
        engine.start(SessionType::Work, profile(), t0()).unwrap();
        // A single late tick 1500s in covers the whole session.
        let event = engine.tick(t0() + Duration::seconds(1500));
        assert!(matches!(event, Some(Event::SessionCompleted { .. })));
    }

    #[test]
    fn paused_interval_excluded_from_accounting() {
        // 600s active, 300s paused, 900s active.
        let mut engine = TimerEngine::new();
        engine.start(SessionType::Work, profile(), t0()).unwrap();

        tick_for(&mut engine, t0(), 600);
        let at_pause = t0() + Duration::seconds(600);
        engine.pause(at_pause).unwrap();

        // Clock advances 300s with no effect.
        let at_resume = at_pause + Duration::seconds(300);
        engine.resume(at_resume).unwrap();
        assert_eq!(
            engine.snapshot().session.unwrap().active_accum_seconds,
            600.0
        );

        let last = tick_for(&mut engine, at_resume, 900);
        match last {
            Some(Event::SessionCompleted { actual_seconds, .. }) => {
                assert_eq!(actual_seconds, 1500.0)
            }
            other => panic!("expected SessionCompleted, got {other:?}"),
        }
    }

    #[test]
    fn extend_adds_profile_increment_per_call() {
        let mut engine = TimerEngine::new();
        engine.start(SessionType::Work, profile(), t0()).unwrap();
        engine.extend(None, t0()).unwrap();
        let event = engine.extend(None, t0()).unwrap();
        match event {
            Event::SessionExtended {
                planned_seconds,
                extend_count,
                ..
            } => {
                assert_eq!(planned_seconds, 1500 + 2 * 300);
                assert_eq!(extend_count, 2);
            }
            other => panic!("expected SessionExtended, got {other:?}"),
        }
    }

    #[test]
    fn extend_uses_break_increment_for_breaks() {
        let mut engine = TimerEngine::new();
        let p = TimerProfile {
            work_extend_seconds: 600,
            break_extend_seconds: 120,
            ..TimerProfile::default()
        };
        engine.start(SessionType::ShortBreak, p, t0()).unwrap();
        engine.extend(None, t0()).unwrap();
        assert_eq!(
            engine.snapshot().session.unwrap().planned_seconds,
            300 + 120
        );
    }

    #[test]
    fn extend_minutes_override_wins() {
        let mut engine = TimerEngine::new();
        engine.start(SessionType::Work, profile(), t0()).unwrap();
        engine.extend(Some(10), t0()).unwrap();
        assert_eq!(
            engine.snapshot().session.unwrap().planned_seconds,
            1500 + 600
        );
    }

    #[test]
    fn extend_rejected_while_idle() {
        let mut engine = TimerEngine::new();
        assert!(engine.extend(None, t0()).is_err());
    }

    #[test]
    fn extend_allowed_while_paused() {
        let mut engine = TimerEngine::new();
        engine.start(SessionType::Work, profile(), t0()).unwrap();
        engine.pause(t0()).unwrap();
        assert!(engine.extend(None, t0()).is_ok());
        assert_eq!(engine.phase(), Phase::Paused);
    }

    #[test]
    fn stop_never_marks_completed() {
        let mut engine = TimerEngine::new();
        engine.start(SessionType::Work, profile(), t0()).unwrap();
        tick_for(&mut engine, t0(), 100);
        engine.stop(t0() + Duration::seconds(100)).unwrap();
        assert_eq!(engine.pomodoros_completed_since_long_break(), 0);
        assert_eq!(engine.suggested_next_session_type(), SessionType::Work);
    }

    #[test]
    fn long_break_cadence() {
        let mut engine = TimerEngine::new();
        let mut at = t0();
        // Threshold is 4; the first three completions suggest short breaks.
        for n in 1..=3 {
            engine.start(SessionType::Work, profile(), at).unwrap();
            engine.tick(at + Duration::seconds(1500));
            at = at + Duration::seconds(1600);
            assert_eq!(engine.pomodoros_completed_since_long_break(), n);
            assert_eq!(
                engine.suggested_next_session_type(),
                SessionType::ShortBreak
            );
        }
        engine.start(SessionType::Work, profile(), at).unwrap();
        engine.tick(at + Duration::seconds(1500));
        at = at + Duration::seconds(1600);
        assert_eq!(engine.suggested_next_session_type(), SessionType::LongBreak);

        // Counter resets when the long break actually starts.
        engine.start(SessionType::LongBreak, profile(), at).unwrap();
        assert_eq!(engine.pomodoros_completed_since_long_break(), 0);
        engine.tick(at + Duration::seconds(900));
        assert_eq!(engine.suggested_next_session_type(), SessionType::Work);
    }

    #[test]
    fn completed_break_suggests_work() {
        let mut engine = TimerEngine::new();
        engine
            .start(SessionType::ShortBreak, profile(), t0())
            .unwrap();
        engine.tick(t0() + Duration::seconds(300));
        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.suggested_next_session_type(), SessionType::Work);
    }

    #[test]
    fn reset_requires_idle_and_clears_cadence() {
        let mut engine = TimerEngine::new();
        engine.start(SessionType::Work, profile(), t0()).unwrap();
        assert!(engine.reset().is_err());
        engine.tick(t0() + Duration::seconds(1500));
        engine.reset().unwrap();
        assert_eq!(engine.pomodoros_completed_since_long_break(), 0);
        assert_eq!(engine.suggested_next_session_type(), SessionType::Work);
    }

    #[test]
    fn remaining_never_negative() {
        let mut engine = TimerEngine::new();
        engine.start(SessionType::Work, profile(), t0()).unwrap();
        // Overshoot wildly; completion caps remaining at zero.
        let snapshot_before = engine.snapshot();
        assert_eq!(snapshot_before.remaining_seconds, 1500.0);
        engine.tick(t0() + Duration::seconds(10_000));
        assert_eq!(engine.snapshot().remaining_seconds, 0.0);
    }

    #[test]
    fn snapshot_reports_actual_work_only_for_work() {
        let mut engine = TimerEngine::new();
        engine.start(SessionType::Work, profile(), t0()).unwrap();
        tick_for(&mut engine, t0(), 60);
        assert_eq!(engine.snapshot().actual_work_seconds, Some(60.0));
        engine.stop(t0() + Duration::seconds(60)).unwrap();

        engine
            .start(SessionType::ShortBreak, profile(), t0())
            .unwrap();
        assert_eq!(engine.snapshot().actual_work_seconds, None);
    }
}
