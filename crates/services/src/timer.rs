use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use exam_core::model::{TimerRecovery, TimerState};
use storage::repository::StorageError;
use storage::session_store::SessionStore;

/// Result of one timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTick {
    /// Counting down.
    Running { remaining: Duration },
    /// The countdown reached zero on this tick. Reported once per session.
    Expired,
    /// Not counting: never started, stopped, or already expired.
    Idle,
}

#[derive(Debug, Default)]
struct TimerRun {
    state: Option<TimerState>,
    // expired or stopped; a finished timer never starts again
    finished: bool,
}

/// Wall-clock countdown that survives reloads through the session store.
///
/// Remaining time is always `duration - (now - started_at)`; ticks only
/// decide when to look at the clock.
pub struct SessionTimer {
    store: SessionStore,
    duration: Duration,
    run: Mutex<TimerRun>,
}

impl SessionTimer {
    /// Rebuild the timer from persisted state.
    ///
    /// A countdown that already ran out is cleared from the store and the
    /// timer comes back expired; the caller fires expiry for that case, so
    /// later ticks never report it again.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read or cleared.
    pub async fn restore(
        store: SessionStore,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<(Self, TimerRecovery), StorageError> {
        let saved = store.load_timer().await?;
        let recovery = TimerState::recover(saved, duration, now);

        let run = match recovery {
            TimerRecovery::Fresh => {
                if saved.is_some() {
                    store.clear_timer().await?;
                }
                TimerRun::default()
            }
            TimerRecovery::Resumed { state, .. } => TimerRun {
                state: Some(state),
                finished: false,
            },
            TimerRecovery::Expired { .. } => {
                store.clear_timer().await?;
                TimerRun {
                    state: None,
                    finished: true,
                }
            }
        };

        Ok((
            Self {
                store,
                duration,
                run: Mutex::new(run),
            },
            recovery,
        ))
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Begin the countdown unless it is already running or has finished.
    ///
    /// Returns the remaining time after the call.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the new start cannot be persisted.
    pub async fn start(&self, now: DateTime<Utc>) -> Result<Duration, StorageError> {
        let fresh = {
            let mut run = self.lock();
            if run.finished {
                return Ok(Duration::zero());
            }
            if let Some(state) = run.state {
                return Ok(state.remaining(self.duration, now));
            }
            let state = TimerState::started(now);
            run.state = Some(state);
            state
        };

        tracing::info!(
            session_id = %self.store.session_id(),
            duration_ms = self.duration.num_milliseconds(),
            "session timer started"
        );
        self.store.save_timer(&fresh).await?;
        Ok(self.duration)
    }

    /// Halt the countdown for good and clear its persisted state.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the persisted state cannot be cleared.
    pub async fn stop(&self) -> Result<(), StorageError> {
        {
            let mut run = self.lock();
            run.state = None;
            run.finished = true;
        }
        self.store.clear_timer().await
    }

    /// Recompute the remaining time; reports expiry on the first zero-crossing.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the expired state cannot be cleared. The
    /// expiry is still recorded in memory and reported.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TimerTick, StorageError> {
        {
            let mut run = self.lock();
            let Some(state) = run.state else {
                return Ok(TimerTick::Idle);
            };
            let remaining = state.remaining(self.duration, now);
            if !remaining.is_zero() {
                return Ok(TimerTick::Running { remaining });
            }
            run.state = None;
            run.finished = true;
        }

        tracing::info!(session_id = %self.store.session_id(), "session timer expired");
        if let Err(err) = self.store.clear_timer().await {
            tracing::warn!(
                session_id = %self.store.session_id(),
                error = %err,
                "failed to clear expired timer state"
            );
        }
        Ok(TimerTick::Expired)
    }

    /// Remaining time, clamped at zero. A timer that was never started
    /// reports the full duration; a finished one reports zero.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let run = self.lock();
        if run.finished {
            return Duration::zero();
        }
        run.state
            .map_or(self.duration, |state| state.remaining(self.duration, now))
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now).is_zero()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().state.is_some()
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().state.map(|state| state.started_at)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimerRun> {
        // a poisoned guard still holds consistent plain data
        self.run.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
