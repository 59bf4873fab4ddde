//! Background loops. Each holds only a weak reference to the session and
//! exits once the session is gone or its work is done. Finalize always runs
//! on a task of its own so aborting a loop never cancels a submission.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::monitor::{HostSignal, MonitorStatus};
use crate::timer::TimerTick;

use super::ExamSession;

pub(super) fn spawn_timer_loop(session: &Arc<ExamSession>) -> JoinHandle<()> {
    let weak = Arc::downgrade(session);
    let period = session.settings.tick_interval();

    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(session) = weak.upgrade() else {
                break;
            };
            match session.timer.tick(session.clock.now()).await {
                Ok(TimerTick::Running { .. }) => {}
                Ok(TimerTick::Expired) => {
                    tokio::spawn(async move {
                        if let Err(err) = session.expire().await {
                            tracing::error!(
                                session_id = %session.id,
                                error = %err,
                                "timer finalize failed"
                            );
                        }
                    });
                    break;
                }
                Ok(TimerTick::Idle) => break,
                Err(err) => {
                    tracing::warn!(session_id = %session.id, error = %err, "timer tick failed");
                }
            }
        }
    })
}

pub(super) fn spawn_sample_loop(session: &Arc<ExamSession>) -> JoinHandle<()> {
    let weak = Arc::downgrade(session);
    let period = session.settings.sample_interval();

    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(session) = weak.upgrade() else {
                break;
            };
            if session.monitor.status() != MonitorStatus::Active {
                break;
            }
            if let Err(err) = session.sample().await {
                tracing::warn!(session_id = %session.id, error = %err, "camera sample failed");
            }
        }
    })
}

pub(super) fn spawn_signal_loop(
    session: &Arc<ExamSession>,
    mut signals: mpsc::Receiver<HostSignal>,
) -> JoinHandle<()> {
    let weak: Weak<ExamSession> = Arc::downgrade(session);

    tokio::spawn(async move {
        while let Some(signal) = signals.recv().await {
            let Some(session) = weak.upgrade() else {
                break;
            };
            if let Err(err) = session.handle_host_signal(signal).await {
                tracing::warn!(session_id = %session.id, error = %err, "host signal failed");
            }
            if signal == HostSignal::BeforeTeardown {
                break;
            }
        }
    })
}
