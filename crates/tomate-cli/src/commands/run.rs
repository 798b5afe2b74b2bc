//! Foreground session runner.
//!
//! Starts one session under the coordinator with its 1 Hz background
//! ticker, printing every event as a JSON line until the session ends.
//! Ctrl-C stops the session cleanly so the sink row is closed.

use std::sync::Arc;

use tomate_core::{Config, CoordinatorConfig, Event, SessionSink, TimerCoordinator};

type CliError = Box<dyn std::error::Error>;

pub fn run(kind: Option<String>, profile: Option<String>) -> Result<(), CliError> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_session(kind, profile))
}

async fn run_session(kind: Option<String>, profile: Option<String>) -> Result<(), CliError> {
    let config = Config::load()?;
    let sink: Arc<dyn SessionSink> = Arc::new(super::open_db()?);

    let mut coordinator_config = CoordinatorConfig::new(super::snapshot_path()?);
    coordinator_config.snapshot_interval =
        chrono::Duration::seconds(config.persistence.snapshot_interval_secs as i64);
    coordinator_config.stale_after =
        chrono::Duration::seconds(config.persistence.stale_after_secs);

    let (coordinator, mut events) = TimerCoordinator::new(coordinator_config, sink);

    if let Some(pending) = coordinator.recover()? {
        println!("{}", serde_json::to_string_pretty(&pending)?);
        return Err("a previous session needs recovery; run `tomate timer recover`".into());
    }

    let session_type = match kind.as_deref() {
        Some(kind) => super::timer::parse_kind(kind)?,
        None => coordinator.suggested_next_session_type(),
    };
    let timer_profile = config.profile(profile.as_deref())?;
    coordinator.start(session_type, timer_profile)?;
    coordinator.start_ticker();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);
                if matches!(
                    event,
                    Event::SessionCompleted { .. } | Event::SessionStopped { .. }
                ) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                // The stop event still flows through the channel above.
                coordinator.stop()?;
            }
        }
    }

    coordinator.stop_ticker();
    Ok(())
}
