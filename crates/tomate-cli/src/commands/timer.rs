use std::sync::Arc;

use chrono::Utc;
use clap::Subcommand;
use tomate_core::{
    Config, Event, PersistedState, RecoveryManager, RecoveryResolution, SessionDb, SessionSink,
    SessionType, StateStore, TimerEngine,
};

type CliError = Box<dyn std::error::Error>;

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start a session (defaults to the suggested next type)
    Start {
        /// Session type: work, short_break or long_break
        #[arg(long)]
        kind: Option<String>,
        /// Profile name (defaults to the configured current profile)
        #[arg(long)]
        profile: Option<String>,
    },
    /// Pause the running session
    Pause,
    /// Resume a paused session
    Resume,
    /// Extend the current session
    Extend {
        /// Minutes to add (defaults to the profile's extend amount)
        #[arg(long)]
        minutes: Option<u32>,
    },
    /// Stop the current session without completing it
    Stop,
    /// Reset the pomodoro cadence to zero
    Reset,
    /// Advance the timer and print its state as JSON
    Status,
    /// Reconcile a session left behind by a crash
    Recover {
        /// Mark the orphaned session completed at its planned duration
        #[arg(long, conflicts_with_all = ["incomplete", "discard"])]
        complete: bool,
        /// Terminate the orphaned session without completion credit
        #[arg(long, conflicts_with = "discard")]
        incomplete: bool,
        /// Delete the orphaned session record entirely
        #[arg(long)]
        discard: bool,
    },
}

pub fn parse_kind(kind: &str) -> Result<SessionType, CliError> {
    match kind {
        "work" => Ok(SessionType::Work),
        "short_break" | "short-break" => Ok(SessionType::ShortBreak),
        "long_break" | "long-break" => Ok(SessionType::LongBreak),
        other => Err(format!("unknown session type: {other}").into()),
    }
}

/// Everything a one-shot timer command needs: the engine restored from
/// the last snapshot, plus the stores it reads and writes.
struct TimerContext {
    config: Config,
    store: StateStore,
    db: SessionDb,
    engine: TimerEngine,
    session_id: Option<i64>,
}

impl TimerContext {
    fn load() -> Result<Self, CliError> {
        let config = Config::load()?;
        let store = StateStore::new(super::snapshot_path()?);
        let db = super::open_db()?;
        let (engine, session_id) = match store.load()? {
            Some(state) => {
                let profile = state
                    .profile_name
                    .as_deref()
                    .and_then(|name| config.profile(Some(name)).ok());
                let session_id = state.session_id;
                (TimerEngine::restore(&state, profile), session_id)
            }
            None => (TimerEngine::new(), None),
        };
        Ok(Self {
            config,
            store,
            db,
            engine,
            session_id,
        })
    }

    fn save(&self) -> Result<(), CliError> {
        let state =
            PersistedState::from_snapshot(&self.engine.snapshot(), self.session_id, Utc::now());
        self.store.save(&state)?;
        Ok(())
    }

    /// Close the sink row for a session that just ended. Sink failures
    /// are logged, never fatal.
    fn close_session(&mut self, event: &Event) {
        let (at, actual_seconds, completed, extend_count) = match event {
            Event::SessionCompleted {
                at,
                actual_seconds,
                extend_count,
                ..
            } => (*at, *actual_seconds, true, *extend_count),
            Event::SessionStopped {
                at,
                actual_seconds,
                extend_count,
                ..
            } => (*at, *actual_seconds, false, *extend_count),
            _ => return,
        };
        let Some(session_id) = self.session_id.take() else {
            return;
        };
        if let Err(err) =
            self.db
                .record_session_end(session_id, at, actual_seconds, completed, extend_count)
        {
            tracing::warn!(error = %err, "session sink write dropped");
        }
    }

    /// Advance the engine to `now`; a completion closes its sink row
    /// and is printed as an event.
    fn advance(&mut self) -> Result<(), CliError> {
        if let Some(event) = self.engine.tick(Utc::now()) {
            if matches!(event, Event::SessionCompleted { .. }) {
                self.close_session(&event);
                println!("{}", serde_json::to_string_pretty(&event)?);
            }
        }
        Ok(())
    }
}

pub fn run(action: TimerAction) -> Result<(), CliError> {
    if let TimerAction::Recover {
        complete,
        incomplete,
        discard,
    } = action
    {
        return recover(complete, incomplete, discard);
    }

    let mut ctx = TimerContext::load()?;
    let now = Utc::now();

    match action {
        TimerAction::Start { kind, profile } => {
            let session_type = match kind.as_deref() {
                Some(kind) => parse_kind(kind)?,
                None => ctx.engine.suggested_next_session_type(),
            };
            let timer_profile = ctx.config.profile(profile.as_deref())?;
            let event = ctx.engine.start(session_type, timer_profile, now)?;
            if let Event::SessionStarted {
                planned_seconds,
                profile_name,
                ..
            } = &event
            {
                match ctx.db.record_session_start(
                    session_type,
                    *planned_seconds,
                    profile_name,
                    now,
                ) {
                    Ok(id) => ctx.session_id = Some(id),
                    Err(err) => tracing::warn!(error = %err, "session sink write dropped"),
                }
            }
            println!("{}", serde_json::to_string_pretty(&event)?);
        }
        TimerAction::Pause => {
            ctx.engine.pause(now)?;
            println!("{}", serde_json::to_string_pretty(&ctx.engine.snapshot())?);
        }
        TimerAction::Resume => {
            ctx.engine.resume(now)?;
            println!("{}", serde_json::to_string_pretty(&ctx.engine.snapshot())?);
        }
        TimerAction::Extend { minutes } => {
            let event = ctx.engine.extend(minutes, now)?;
            if let Some(session_id) = ctx.session_id {
                if let Err(err) = ctx.db.record_extend(session_id) {
                    tracing::warn!(error = %err, "session sink write dropped");
                }
            }
            println!("{}", serde_json::to_string_pretty(&event)?);
        }
        TimerAction::Stop => {
            // An overdue session completes rather than being cut short.
            ctx.advance()?;
            if let Some(event) = ctx.engine.stop(Utc::now())? {
                ctx.close_session(&event);
                println!("{}", serde_json::to_string_pretty(&event)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&ctx.engine.snapshot())?);
            }
        }
        TimerAction::Reset => {
            ctx.engine.reset()?;
            println!("{{\"type\": \"timer_reset\"}}");
        }
        TimerAction::Status => {
            ctx.advance()?;
            println!("{}", serde_json::to_string_pretty(&ctx.engine.snapshot())?);
        }
        TimerAction::Recover { .. } => unreachable!("handled above"),
    }

    ctx.save()?;
    Ok(())
}

fn recover(complete: bool, incomplete: bool, discard: bool) -> Result<(), CliError> {
    let config = Config::load()?;
    let sink: Arc<dyn SessionSink> = Arc::new(super::open_db()?);
    let manager = RecoveryManager::new(
        StateStore::new(super::snapshot_path()?),
        sink,
        chrono::Duration::seconds(config.persistence.stale_after_secs),
    );
    let now = Utc::now();

    let Some(pending) = manager.check(now)? else {
        println!("nothing to recover");
        return Ok(());
    };

    if complete || incomplete {
        manager.resolve(
            &pending,
            RecoveryResolution::MarkComplete {
                completed: complete,
            },
            now,
        )?;
        println!(
            "session {} marked {}",
            pending.session_id,
            if complete { "completed" } else { "incomplete" }
        );
    } else if discard {
        manager.resolve(&pending, RecoveryResolution::Discard, now)?;
        println!("session {} discarded", pending.session_id);
    } else {
        // No resolution flag: just show what is pending.
        println!("{}", serde_json::to_string_pretty(&pending)?);
    }
    Ok(())
}
