//! One proctored assessment attempt, from readiness check to submission.

mod loops;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use exam_core::Clock;
use exam_core::model::{
    AssessmentSettings, ExamProgress, QuestionId, QuestionProgress, QuestionSet, SessionId,
    StatusCounts, SubmissionTrigger, TimerRecovery, ViolationKind, ViolationLedger,
};
use storage::repository::KeyValueStore;
use storage::session_store::SessionStore;

use crate::collaborators::{
    CheatEventSink, GradingClient, QuestionSetLoader, Readiness, SessionStatusProbe,
    SubmissionPayload,
};
use crate::error::SessionError;
use crate::monitor::{
    CameraSource, EnvironmentalMonitor, FaceDetector, HostSignal, MonitorStatus,
    RecordedViolation,
};
use crate::progress::ProgressService;
use crate::submission::{FinalizeOutcome, Submission, SubmissionOrchestrator};
use crate::timer::{SessionTimer, TimerTick};
use crate::violations::ViolationRecorder;

const EVENT_CAPACITY: usize = 64;

/// Everything a session needs from its host.
pub struct ExamDeps {
    pub probe: Arc<dyn SessionStatusProbe>,
    pub loader: Arc<dyn QuestionSetLoader>,
    pub grading: Arc<dyn GradingClient>,
    pub sink: Arc<dyn CheatEventSink>,
    pub camera: Arc<dyn CameraSource>,
    pub detector: Box<dyn FaceDetector>,
    pub kv: Arc<dyn KeyValueStore>,
    pub settings: AssessmentSettings,
    pub clock: Clock,
}

/// Notifications for the host UI.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    TimerExpired,
    Violation(RecordedViolation),
    Submitted(Submission),
    /// A submission failed. Automatic ones leave the session locked until
    /// `retry_submission` succeeds.
    SubmitFailed {
        trigger: SubmissionTrigger,
        message: String,
    },
}

/// A running assessment attempt.
///
/// Three sources drive it concurrently: the timer loop, the sampling loop,
/// and host calls (answers, focus signals, submit). All of them end in the
/// same at-most-once finalize.
pub struct ExamSession {
    id: SessionId,
    settings: AssessmentSettings,
    clock: Clock,
    store: SessionStore,
    recovery: TimerRecovery,
    timer: SessionTimer,
    recorder: Arc<ViolationRecorder>,
    monitor: EnvironmentalMonitor,
    progress: ProgressService,
    orchestrator: SubmissionOrchestrator,
    started: AtomicBool,
    loops: Mutex<Vec<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl ExamSession {
    /// Check readiness, load and validate the question set, and restore
    /// whatever a previous run persisted.
    ///
    /// A payload left behind by a submission that never got accepted brings
    /// the session back finalized and locked, waiting for
    /// [`ExamSession::retry_submission`].
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Preparing` while the backend is still building
    /// the set, `SessionError::NotReady` for a set that fails validation, and
    /// collaborator or storage errors as they occur.
    pub async fn prepare(deps: ExamDeps, session_id: SessionId) -> Result<Arc<Self>, SessionError> {
        let ExamDeps {
            probe,
            loader,
            grading,
            sink,
            camera,
            detector,
            kv,
            settings,
            clock,
        } = deps;

        if probe.status(&session_id).await? == Readiness::Preparing {
            tracing::info!(%session_id, "session still preparing");
            return Err(SessionError::Preparing(session_id));
        }

        let questions = loader.load(&session_id).await?;
        let set = QuestionSet::with_expected(questions, settings.expected_per_section())
            .inspect_err(|err| tracing::warn!(%session_id, error = %err, "question set rejected"))?;
        tracing::info!(%session_id, questions = set.len(), "question set loaded");

        let store = SessionStore::new(kv, session_id.clone());
        let progress = ProgressService::restore(store.clone(), Arc::new(set)).await?;
        let recorder = Arc::new(ViolationRecorder::restore(store.clone(), sink).await?);
        let (timer, recovery) =
            SessionTimer::restore(store.clone(), settings.duration(), clock.now()).await?;
        let monitor =
            EnvironmentalMonitor::new(&settings, Arc::clone(&recorder), camera, detector);
        let orchestrator = SubmissionOrchestrator::new(
            session_id.clone(),
            grading,
            settings.unscored_sections().clone(),
            clock,
        );
        if let Some(payload) = store.load_pending_submission::<SubmissionPayload>().await? {
            orchestrator.restore_failed(payload);
            progress.lock_edits().await;
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Arc::new(Self {
            id: session_id,
            settings,
            clock,
            store,
            recovery,
            timer,
            recorder,
            monitor,
            progress,
            orchestrator,
            started: AtomicBool::new(false),
            loops: Mutex::new(Vec::new()),
            events,
        }))
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn settings(&self) -> &AssessmentSettings {
        &self.settings
    }

    /// How the timer came back when the session was prepared.
    #[must_use]
    pub fn recovery(&self) -> TimerRecovery {
        self.recovery
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Start the countdown, proctoring and background loops.
    ///
    /// A countdown that ran out while the session was closed finalizes with
    /// the `Timer` trigger right here instead, and a restored warning count
    /// that already meets the limit finalizes under the monitor policy.
    /// A session restored with an unsent submission starts nothing. Later
    /// calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns storage errors from starting the timer or recording a camera
    /// failure, and submission errors from an immediate timer finalize.
    pub async fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if self.orchestrator.is_finalized() {
            tracing::info!(session_id = %self.id, "submission pending retry, not starting");
            return Ok(());
        }

        if matches!(self.recovery, TimerRecovery::Expired { .. }) {
            tracing::info!(session_id = %self.id, "countdown ran out while away");
            self.emit(SessionEvent::TimerExpired);
            self.finalize(SubmissionTrigger::Timer).await?;
            return Ok(());
        }

        let now = self.clock.now();
        let remaining = self.timer.start(now).await?;
        tracing::info!(
            session_id = %self.id,
            remaining_ms = remaining.num_milliseconds(),
            "session started"
        );

        if let Some(recorded) = self.monitor.start_proctoring(now).await? {
            self.after_violation(recorded);
        }

        {
            let mut loops = self.lock_loops();
            loops.push(loops::spawn_timer_loop(self));
            loops.push(loops::spawn_sample_loop(self));
        }

        let warning_count = self.recorder.warning_count().await;
        self.enforce_warning_limit(warning_count);
        Ok(())
    }

    /// Feed host signals from `signals` until the channel closes or the host
    /// announces teardown.
    pub fn attach_host_signals(self: &Arc<Self>, signals: mpsc::Receiver<HostSignal>) {
        let handle = loops::spawn_signal_loop(self, signals);
        self.lock_loops().push(handle);
    }

    /// Apply one host signal directly.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if a violation cannot be persisted.
    pub async fn handle_host_signal(self: &Arc<Self>, signal: HostSignal) -> Result<(), SessionError> {
        if signal == HostSignal::BeforeTeardown {
            self.teardown().await;
            return Ok(());
        }
        if let Some(recorded) = self.monitor.observe_host(signal, self.clock.now()).await? {
            self.after_violation(recorded);
        }
        Ok(())
    }

    /// Record a violation raised by the host itself.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the ledger cannot be persisted.
    pub async fn report_violation(
        self: &Arc<Self>,
        kind: ViolationKind,
    ) -> Result<usize, SessionError> {
        let warning_count = self.recorder.add_warning(kind.clone(), self.clock.now()).await?;
        self.after_violation(RecordedViolation {
            kind,
            warning_count,
        });
        Ok(warning_count)
    }

    /// Advance the countdown once; finalizes with `Timer` on expiry.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the timer and submission errors from the
    /// timer finalize.
    pub async fn tick(&self) -> Result<TimerTick, SessionError> {
        let tick = self.timer.tick(self.clock.now()).await?;
        if tick == TimerTick::Expired {
            self.expire().await?;
        }
        Ok(tick)
    }

    /// Take and classify one camera sample.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if a violation cannot be persisted.
    pub async fn sample(self: &Arc<Self>) -> Result<Option<RecordedViolation>, SessionError> {
        let recorded = self.monitor.sample(self.clock.now()).await?;
        if let Some(recorded) = &recorded {
            self.after_violation(recorded.clone());
        }
        Ok(recorded)
    }

    // ─── ANSWERS ──────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `SessionError::Locked` once finalize has begun, otherwise as
    /// [`ProgressService::select_option`].
    pub async fn select_option(&self, option: usize) -> Result<QuestionProgress, SessionError> {
        self.ensure_open()?;
        self.progress.select_option(option).await
    }

    /// # Errors
    ///
    /// See [`ExamSession::select_option`].
    pub async fn clear_answer(&self) -> Result<QuestionProgress, SessionError> {
        self.ensure_open()?;
        self.progress.clear_answer().await
    }

    /// # Errors
    ///
    /// See [`ExamSession::select_option`].
    pub async fn toggle_review(&self) -> Result<QuestionProgress, SessionError> {
        self.ensure_open()?;
        self.progress.toggle_review().await
    }

    /// # Errors
    ///
    /// See [`ExamSession::select_option`].
    pub async fn go_to(&self, index: usize) -> Result<QuestionProgress, SessionError> {
        self.ensure_open()?;
        self.progress.go_to(index).await
    }

    /// # Errors
    ///
    /// See [`ExamSession::select_option`].
    pub async fn go_to_question(&self, id: &QuestionId) -> Result<QuestionProgress, SessionError> {
        self.ensure_open()?;
        self.progress.go_to_question(id).await
    }

    /// # Errors
    ///
    /// See [`ExamSession::select_option`].
    pub async fn go_to_section(&self, section: u8) -> Result<QuestionProgress, SessionError> {
        self.ensure_open()?;
        self.progress.go_to_section(section).await
    }

    /// # Errors
    ///
    /// See [`ExamSession::select_option`].
    pub async fn next(&self) -> Result<bool, SessionError> {
        self.ensure_open()?;
        self.progress.next().await
    }

    /// # Errors
    ///
    /// See [`ExamSession::select_option`].
    pub async fn previous(&self) -> Result<bool, SessionError> {
        self.ensure_open()?;
        self.progress.previous().await
    }

    pub async fn progress(&self) -> ExamProgress {
        self.progress.snapshot().await
    }

    pub async fn status_counts(&self) -> StatusCounts {
        self.progress.status_counts().await
    }

    // ─── STATUS ───────────────────────────────────────────────────────────────

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.timer.remaining(self.clock.now())
    }

    pub async fn warning_count(&self) -> usize {
        self.recorder.warning_count().await
    }

    pub async fn violations(&self) -> ViolationLedger {
        self.recorder.ledger().await
    }

    #[must_use]
    pub fn monitor_status(&self) -> MonitorStatus {
        self.monitor.status()
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.orchestrator.is_finalized()
    }

    #[must_use]
    pub fn submission(&self) -> Option<Submission> {
        self.orchestrator.submitted()
    }

    // ─── SUBMISSION ───────────────────────────────────────────────────────────

    /// Finalize at the user's request.
    ///
    /// # Errors
    ///
    /// See [`ExamSession::finalize`].
    pub async fn submit(&self) -> Result<FinalizeOutcome, SessionError> {
        self.finalize(SubmissionTrigger::User).await
    }

    /// Lock answers, score them and transmit, unless another trigger
    /// already did.
    ///
    /// The payload is persisted before it is sent. On success the timer and
    /// monitor stop and every persisted record is cleared. On failure they
    /// stay, so a reload comes back locked with the same payload.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Submission` when transmission fails.
    pub async fn finalize(&self, trigger: SubmissionTrigger) -> Result<FinalizeOutcome, SessionError> {
        let Some(ticket) = self.orchestrator.try_begin(trigger) else {
            return Ok(FinalizeOutcome::AlreadyFinalized);
        };

        self.progress.lock_edits().await;
        self.abort_loops();
        self.monitor.stop_proctoring().await;

        let snapshot = self.progress.snapshot().await;
        let warning_count = self.recorder.warning_count().await;
        let prepared = self.orchestrator.prepare(ticket, &snapshot, warning_count);
        if let Err(err) = self.store.save_pending_submission(prepared.payload()).await {
            tracing::warn!(
                session_id = %self.id,
                error = %err,
                "failed to persist pending submission"
            );
        }
        match self.orchestrator.send(prepared).await {
            Ok(submission) => {
                self.complete(&submission).await;
                Ok(FinalizeOutcome::Submitted(submission))
            }
            Err(err) => {
                self.emit(SessionEvent::SubmitFailed {
                    trigger,
                    message: err.to_string(),
                });
                Err(err.into())
            }
        }
    }

    /// Re-send a failed submission with its original snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Submission` if nothing failed or the retry fails.
    pub async fn retry_submission(&self) -> Result<Submission, SessionError> {
        match self.orchestrator.retry().await {
            Ok(submission) => {
                self.complete(&submission).await;
                Ok(submission)
            }
            Err(err) => {
                if let Some(payload) = self.orchestrator.pending_retry() {
                    self.emit(SessionEvent::SubmitFailed {
                        trigger: payload.trigger,
                        message: err.to_string(),
                    });
                }
                Err(err.into())
            }
        }
    }

    /// Stop background work and release the camera, keeping persisted state
    /// so the attempt can resume. An in-flight submission keeps running.
    pub async fn teardown(&self) {
        self.monitor.stop_proctoring().await;
        self.abort_loops();
        tracing::info!(session_id = %self.id, "session torn down");
    }

    async fn expire(&self) -> Result<(), SessionError> {
        self.emit(SessionEvent::TimerExpired);
        self.finalize(SubmissionTrigger::Timer).await?;
        Ok(())
    }

    fn after_violation(self: &Arc<Self>, recorded: RecordedViolation) {
        let warning_count = recorded.warning_count;
        self.emit(SessionEvent::Violation(recorded));
        self.enforce_warning_limit(warning_count);
    }

    fn enforce_warning_limit(self: &Arc<Self>, warning_count: usize) {
        if self.settings.auto_submit_on_max_warnings()
            && self.settings.warnings_exhausted(warning_count)
            && !self.orchestrator.is_finalized()
        {
            tracing::warn!(
                session_id = %self.id,
                warning_count,
                "warning limit reached, submitting"
            );
            let session = Arc::clone(self);
            tokio::spawn(async move {
                // failures are already reported through SessionEvent::SubmitFailed
                let _ = session.finalize(SubmissionTrigger::MonitorPolicy).await;
            });
        }
    }

    async fn complete(&self, submission: &Submission) {
        if let Err(err) = self.timer.stop().await {
            tracing::warn!(session_id = %self.id, error = %err, "failed to stop timer");
        }
        self.monitor.stop_proctoring().await;
        if let Err(err) = self.store.clear_all().await {
            tracing::warn!(
                session_id = %self.id,
                error = %err,
                "failed to clear persisted session state"
            );
        }
        self.emit(SessionEvent::Submitted(submission.clone()));
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.orchestrator.is_finalized() {
            Err(SessionError::Locked)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn abort_loops(&self) {
        for handle in self.lock_loops().drain(..) {
            handle.abort();
        }
    }

    fn lock_loops(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.loops.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
