//! Serializes timer access between the background ticker and foreground
//! callers.
//!
//! One `Mutex` guards the engine plus the sink bookkeeping that belongs
//! to the same mutation; every public operation locks it exactly once
//! and calls only the engine's lock-free internals, so a consumer
//! reacting to an event can safely call back into the coordinator from
//! its own context. Events are published to an unbounded channel while
//! the lock is held, which fixes their order without coupling delivery
//! latency to engine mutation latency.
//!
//! Durable snapshot writes happen outside the critical section: the
//! lock scope copies state, the filesystem sees it afterwards.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{CoreError, SinkError};
use crate::events::Event;
use crate::profile::TimerProfile;
use crate::recovery::{PendingRecovery, RecoveryManager, RecoveryResolution};
use crate::state::{PersistedState, StateStore};
use crate::storage::SessionSink;
use crate::timer::{EngineSnapshot, Phase, SessionType, TimerEngine};

/// Explicit wiring for a coordinator; no implicit global paths.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub snapshot_path: PathBuf,
    /// Background tick cadence. Drift-tolerant: ticks carry absolute
    /// timestamps, so a late tick accounts for the full elapsed time.
    pub tick_interval: StdDuration,
    /// Periodic snapshot cadence.
    pub snapshot_interval: Duration,
    /// Snapshots older than this are not offered for recovery.
    pub stale_after: Duration,
}

impl CoordinatorConfig {
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            tick_interval: StdDuration::from_secs(1),
            snapshot_interval: Duration::seconds(30),
            stale_after: Duration::hours(1),
        }
    }
}

struct Shared {
    engine: TimerEngine,
    /// Sink row id of the in-flight session, if the sink accepted it.
    session_id: Option<i64>,
    last_snapshot_at: DateTime<Utc>,
}

struct Inner {
    shared: Mutex<Shared>,
    store: StateStore,
    sink: Arc<dyn SessionSink>,
    events: mpsc::UnboundedSender<Event>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    tick_interval: StdDuration,
    snapshot_interval: Duration,
    stale_after: Duration,
}

/// Cheap-to-clone handle over the shared timer state.
#[derive(Clone)]
pub struct TimerCoordinator {
    inner: Arc<Inner>,
}

impl TimerCoordinator {
    /// Build a coordinator and the receiving end of its event stream.
    ///
    /// An idle snapshot left by an orderly shutdown restores the
    /// pomodoro cadence; non-idle snapshots are left for [`recover`]
    /// (Self::recover) to reconcile.
    pub fn new(
        config: CoordinatorConfig,
        sink: Arc<dyn SessionSink>,
    ) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let store = StateStore::new(config.snapshot_path);
        let engine = match store.load() {
            Ok(Some(state)) if state.phase == Phase::Idle => TimerEngine::restore(&state, None),
            Ok(_) => TimerEngine::new(),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring unreadable snapshot");
                TimerEngine::new()
            }
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    engine,
                    session_id: None,
                    last_snapshot_at: Utc::now(),
                }),
                store,
                sink,
                events: tx,
                ticker: Mutex::new(None),
                tick_interval: config.tick_interval,
                snapshot_interval: config.snapshot_interval,
                stale_after: config.stale_after,
            }),
        };
        (coordinator, rx)
    }

    fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: &Event) {
        // A dropped receiver just means nobody is listening.
        let _ = self.inner.events.send(event.clone());
    }

    fn persisted(shared: &Shared, now: DateTime<Utc>) -> PersistedState {
        PersistedState::from_snapshot(&shared.engine.snapshot(), shared.session_id, now)
    }

    /// Durable write, performed outside the critical section. Failures
    /// are logged; the engine keeps operating purely in memory.
    fn write_snapshot(&self, state: &PersistedState) {
        if let Err(err) = self.inner.store.save(state) {
            tracing::warn!(error = %err, "snapshot write failed, continuing in memory");
        }
    }

    fn log_sink_failure(err: &SinkError) {
        tracing::warn!(error = %err, "session sink write dropped");
    }

    // ── Startup recovery ─────────────────────────────────────────────

    /// Run the startup reconciliation. A pending decision is also
    /// published as [`Event::RecoveryNeeded`].
    pub fn recover(&self) -> Result<Option<PendingRecovery>, CoreError> {
        let now = Utc::now();
        let manager = RecoveryManager::new(
            self.inner.store.clone(),
            Arc::clone(&self.inner.sink),
            self.inner.stale_after,
        );
        let pending = manager.check(now)?;
        match &pending {
            Some(pending) => {
                self.publish(&Event::RecoveryNeeded {
                    session_id: pending.session_id,
                    snapshot: pending.snapshot.clone(),
                    at: now,
                });
            }
            // The check may have settled a stale or sink-less snapshot;
            // the live engine has to agree with what it wrote.
            None => self.adopt_settled_snapshot(),
        }
        Ok(pending)
    }

    /// Apply the external decision for an orphaned session.
    pub fn resolve_recovery(
        &self,
        pending: &PendingRecovery,
        resolution: RecoveryResolution,
    ) -> Result<(), CoreError> {
        let manager = RecoveryManager::new(
            self.inner.store.clone(),
            Arc::clone(&self.inner.sink),
            self.inner.stale_after,
        );
        manager.resolve(pending, resolution, Utc::now())?;
        self.adopt_settled_snapshot();
        Ok(())
    }

    /// Re-restore the engine from the settled idle snapshot, so the
    /// pomodoro cadence recovery preserved on disk is not wiped by the
    /// next snapshot write. Only an idle engine adopts; a session that
    /// started in the meantime wins.
    fn adopt_settled_snapshot(&self) {
        let state = match self.inner.store.load() {
            Ok(Some(state)) if state.phase == Phase::Idle => state,
            Ok(_) => return,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring unreadable snapshot");
                return;
            }
        };
        let mut shared = self.lock_shared();
        if shared.engine.phase() == Phase::Idle {
            let profile = shared.engine.profile().cloned();
            shared.engine = TimerEngine::restore(&state, profile);
        }
    }

    // ── Timer operations ─────────────────────────────────────────────

    /// Start a session; the profile is captured whole for its duration.
    pub fn start(
        &self,
        session_type: SessionType,
        profile: TimerProfile,
    ) -> Result<Event, CoreError> {
        let now = Utc::now();
        let mut shared = self.lock_shared();
        let event = shared.engine.start(session_type, profile, now)?;
        if let Event::SessionStarted {
            planned_seconds,
            profile_name,
            ..
        } = &event
        {
            // Serialized with the mutation it records so the row id and
            // the session can never disagree.
            match self.inner.sink.record_session_start(
                session_type,
                *planned_seconds,
                profile_name,
                now,
            ) {
                Ok(id) => shared.session_id = Some(id),
                Err(err) => Self::log_sink_failure(&err),
            }
        }
        self.publish(&event);
        shared.last_snapshot_at = now;
        let state = Self::persisted(&shared, now);
        drop(shared);
        self.write_snapshot(&state);
        Ok(event)
    }

    pub fn pause(&self) -> Result<(), CoreError> {
        let mut shared = self.lock_shared();
        shared.engine.pause(Utc::now())?;
        Ok(())
    }

    pub fn resume(&self) -> Result<(), CoreError> {
        let mut shared = self.lock_shared();
        shared.engine.resume(Utc::now())?;
        Ok(())
    }

    pub fn extend(&self, minutes_override: Option<u32>) -> Result<Event, CoreError> {
        let mut shared = self.lock_shared();
        let event = shared.engine.extend(minutes_override, Utc::now())?;
        if let Some(session_id) = shared.session_id {
            if let Err(err) = self.inner.sink.record_extend(session_id) {
                Self::log_sink_failure(&err);
            }
        }
        self.publish(&event);
        Ok(event)
    }

    /// Stop the current session. A no-op while idle, per the contract.
    pub fn stop(&self) -> Result<Option<Event>, CoreError> {
        let now = Utc::now();
        let mut shared = self.lock_shared();
        let Some(event) = shared.engine.stop(now)? else {
            return Ok(None);
        };
        self.close_sink_row(&mut shared, &event, now);
        self.publish(&event);
        shared.last_snapshot_at = now;
        let state = Self::persisted(&shared, now);
        drop(shared);
        self.write_snapshot(&state);
        Ok(Some(event))
    }

    /// Clear the pomodoro cadence (engine must be idle).
    pub fn reset(&self) -> Result<(), CoreError> {
        let now = Utc::now();
        let mut shared = self.lock_shared();
        shared.engine.reset()?;
        shared.last_snapshot_at = now;
        let state = Self::persisted(&shared, now);
        drop(shared);
        self.write_snapshot(&state);
        Ok(())
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.lock_shared().engine.snapshot()
    }

    pub fn suggested_next_session_type(&self) -> SessionType {
        self.lock_shared().engine.suggested_next_session_type()
    }

    /// Apply one tick at the given instant. The background ticker calls
    /// this with the current wall clock; tests call it directly.
    pub fn tick_once(&self, now: DateTime<Utc>) {
        let mut shared = self.lock_shared();
        let event = shared.engine.tick(now);
        if let Some(event) = &event {
            if let Event::SessionCompleted { .. } = event {
                self.close_sink_row(&mut shared, event, now);
            }
            self.publish(event);
        }
        let snapshot_due = event.as_ref().map(Event::forces_snapshot).unwrap_or(false)
            || now - shared.last_snapshot_at >= self.inner.snapshot_interval;
        if !snapshot_due {
            return;
        }
        shared.last_snapshot_at = now;
        let state = Self::persisted(&shared, now);
        drop(shared);
        self.write_snapshot(&state);
    }

    fn close_sink_row(&self, shared: &mut Shared, event: &Event, now: DateTime<Utc>) {
        let (actual_seconds, completed, extend_count) = match event {
            Event::SessionCompleted {
                actual_seconds,
                extend_count,
                ..
            } => (*actual_seconds, true, *extend_count),
            Event::SessionStopped {
                actual_seconds,
                extend_count,
                ..
            } => (*actual_seconds, false, *extend_count),
            _ => return,
        };
        let Some(session_id) = shared.session_id.take() else {
            return;
        };
        if let Err(err) = self.inner.sink.record_session_end(
            session_id,
            now,
            actual_seconds,
            completed,
            extend_count,
        ) {
            Self::log_sink_failure(&err);
        }
    }

    // ── Background ticker ────────────────────────────────────────────

    /// Spawn the 1 Hz ticking task. Idempotent: starting while running
    /// is a no-op. Requires a tokio runtime.
    pub fn start_ticker(&self) {
        let mut guard = self
            .inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return;
        }
        let coordinator = self.clone();
        let tick_interval = self.inner.tick_interval;
        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                coordinator.tick_once(Utc::now());
            }
        }));
    }

    /// Stop the ticking task without touching engine state. Idempotent.
    ///
    /// The task only yields at its interval await, never while holding
    /// the shared lock, so aborting it cannot interrupt a tick
    /// mid-application.
    pub fn stop_ticker(&self) {
        let handle = self
            .inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub fn ticker_running(&self) -> bool {
        self.inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
