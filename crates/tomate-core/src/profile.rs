//! Timer profiles: the immutable duration set a session is started with.

use serde::{Deserialize, Serialize};

use crate::timer::SessionType;

/// A named set of session durations.
///
/// Supplied whole at `start()` time and never mutated by the engine.
/// Values are assumed pre-validated by the configuration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerProfile {
    pub name: String,
    pub work_seconds: u64,
    pub short_break_seconds: u64,
    pub long_break_seconds: u64,
    pub pomodoros_until_long_break: u32,
    pub work_extend_seconds: u64,
    pub break_extend_seconds: u64,
}

impl TimerProfile {
    /// Planned duration for a session of the given type.
    pub fn duration_for(&self, session_type: SessionType) -> u64 {
        match session_type {
            SessionType::Work => self.work_seconds,
            SessionType::ShortBreak => self.short_break_seconds,
            SessionType::LongBreak => self.long_break_seconds,
        }
    }

    /// Extend increment for a session of the given type.
    pub fn extend_for(&self, session_type: SessionType) -> u64 {
        match session_type {
            SessionType::Work => self.work_extend_seconds,
            SessionType::ShortBreak | SessionType::LongBreak => self.break_extend_seconds,
        }
    }
}

impl Default for TimerProfile {
    /// The classic 25/5/15 cadence with 5-minute extends.
    fn default() -> Self {
        Self {
            name: "default".into(),
            work_seconds: 25 * 60,
            short_break_seconds: 5 * 60,
            long_break_seconds: 15 * 60,
            pomodoros_until_long_break: 4,
            work_extend_seconds: 5 * 60,
            break_extend_seconds: 5 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_lookup_matches_type() {
        let p = TimerProfile::default();
        assert_eq!(p.duration_for(SessionType::Work), 1500);
        assert_eq!(p.duration_for(SessionType::ShortBreak), 300);
        assert_eq!(p.duration_for(SessionType::LongBreak), 900);
    }

    #[test]
    fn extend_lookup_splits_work_and_break() {
        let p = TimerProfile {
            work_extend_seconds: 600,
            break_extend_seconds: 120,
            ..TimerProfile::default()
        };
        assert_eq!(p.extend_for(SessionType::Work), 600);
        assert_eq!(p.extend_for(SessionType::ShortBreak), 120);
        assert_eq!(p.extend_for(SessionType::LongBreak), 120);
    }
}
