use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The only timer state that survives a reload.
///
/// Remaining time is always derived from `started_at`; it is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub started_at: DateTime<Utc>,
    pub is_active: bool,
}

impl TimerState {
    #[must_use]
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: at,
            is_active: true,
        }
    }

    /// Time elapsed since start. A clock that moved backwards counts as zero.
    #[must_use]
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).max(Duration::zero())
    }

    /// Time left out of `duration`, clamped at zero.
    #[must_use]
    pub fn remaining(&self, duration: Duration, now: DateTime<Utc>) -> Duration {
        (duration - self.elapsed(now)).max(Duration::zero())
    }

    /// Decide how a persisted timer resumes at `now`.
    #[must_use]
    pub fn recover(saved: Option<Self>, duration: Duration, now: DateTime<Utc>) -> TimerRecovery {
        match saved {
            Some(state) if state.is_active => {
                let remaining = state.remaining(duration, now);
                if remaining.is_zero() {
                    TimerRecovery::Expired { state }
                } else {
                    TimerRecovery::Resumed { state, remaining }
                }
            }
            _ => TimerRecovery::Fresh,
        }
    }
}

/// Outcome of reading a persisted timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRecovery {
    /// Nothing usable was persisted; the next start begins a full countdown.
    Fresh,
    /// The countdown continues from the persisted start.
    Resumed {
        state: TimerState,
        remaining: Duration,
    },
    /// The persisted countdown already ran out.
    Expired { state: TimerState },
}
