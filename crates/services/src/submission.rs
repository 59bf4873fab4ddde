use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use exam_core::Clock;
use exam_core::model::{ExamProgress, ResultSnapshot, SessionId, SubmissionTrigger};

use crate::collaborators::{GradingClient, GradingReceipt, SubmissionPayload};
use crate::error::{CollaboratorError, SubmissionError};

/// A transmitted submission and the grader's answer to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub payload: SubmissionPayload,
    pub receipt: GradingReceipt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    Submitted(Submission),
    /// Another trigger already won; its snapshot stands.
    AlreadyFinalized,
}

/// Proof that the caller won the finalize race. Only one is ever issued.
#[derive(Debug)]
pub struct FinalizeTicket {
    trigger: SubmissionTrigger,
}

impl FinalizeTicket {
    #[must_use]
    pub fn trigger(&self) -> SubmissionTrigger {
        self.trigger
    }
}

/// A scored payload that has not been transmitted yet.
#[derive(Debug)]
pub struct PreparedSubmission {
    payload: SubmissionPayload,
}

impl PreparedSubmission {
    #[must_use]
    pub fn payload(&self) -> &SubmissionPayload {
        &self.payload
    }
}

#[derive(Debug, Clone)]
enum SubmissionState {
    Open,
    InFlight,
    Submitted(Submission),
    Failed(SubmissionPayload),
}

/// Finalizes a session at most once, whatever asks first.
///
/// The user, the timer and the monitor policy all race through
/// `try_begin`; the loser of the compare-exchange gets nothing to submit.
/// The winner's snapshot is computed once and kept for `retry`.
pub struct SubmissionOrchestrator {
    session_id: SessionId,
    grading: Arc<dyn GradingClient>,
    unscored_sections: BTreeSet<u8>,
    clock: Clock,
    finalized: AtomicBool,
    state: Mutex<SubmissionState>,
}

impl SubmissionOrchestrator {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        grading: Arc<dyn GradingClient>,
        unscored_sections: BTreeSet<u8>,
        clock: Clock,
    ) -> Self {
        Self {
            session_id,
            grading,
            unscored_sections,
            clock,
            finalized: AtomicBool::new(false),
            state: Mutex::new(SubmissionState::Open),
        }
    }

    /// Claim the single finalize slot. Returns `None` if it is taken.
    pub fn try_begin(&self, trigger: SubmissionTrigger) -> Option<FinalizeTicket> {
        if self
            .finalized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(
                session_id = %self.session_id,
                %trigger,
                "finalize already claimed"
            );
            return None;
        }
        *self.lock() = SubmissionState::InFlight;
        tracing::info!(session_id = %self.session_id, %trigger, "finalizing session");
        Some(FinalizeTicket { trigger })
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Score `progress` into the one payload this session will ever send.
    #[must_use]
    pub fn prepare(
        &self,
        ticket: FinalizeTicket,
        progress: &ExamProgress,
        warning_count: usize,
    ) -> PreparedSubmission {
        let result =
            ResultSnapshot::compute(progress, &self.unscored_sections, self.clock.now());
        PreparedSubmission {
            payload: SubmissionPayload::new(
                self.session_id.clone(),
                progress,
                result,
                warning_count,
                ticket.trigger,
            ),
        }
    }

    /// Transmit a prepared payload.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::Transport` for a failed user submission and
    /// `SubmissionError::AutoSubmitFailed` for a failed timer or monitor one.
    /// Either way the payload is kept for `retry`.
    pub async fn send(&self, prepared: PreparedSubmission) -> Result<Submission, SubmissionError> {
        self.transmit(prepared.payload).await
    }

    /// Score `progress` and transmit it.
    ///
    /// # Errors
    ///
    /// See [`SubmissionOrchestrator::send`].
    pub async fn submit(
        &self,
        ticket: FinalizeTicket,
        progress: &ExamProgress,
        warning_count: usize,
    ) -> Result<Submission, SubmissionError> {
        let prepared = self.prepare(ticket, progress, warning_count);
        self.send(prepared).await
    }

    /// Resume from a payload that an earlier run built but never got
    /// accepted. The slot is taken and only `retry` can send it.
    pub fn restore_failed(&self, payload: SubmissionPayload) {
        self.finalized.store(true, Ordering::Release);
        tracing::info!(
            session_id = %self.session_id,
            trigger = %payload.trigger,
            "restored unsent submission"
        );
        *self.lock() = SubmissionState::Failed(payload);
    }

    /// Claim the slot and submit in one step.
    ///
    /// # Errors
    ///
    /// See [`SubmissionOrchestrator::send`].
    pub async fn finalize(
        &self,
        trigger: SubmissionTrigger,
        progress: &ExamProgress,
        warning_count: usize,
    ) -> Result<FinalizeOutcome, SubmissionError> {
        let Some(ticket) = self.try_begin(trigger) else {
            return Ok(FinalizeOutcome::AlreadyFinalized);
        };
        self.submit(ticket, progress, warning_count)
            .await
            .map(FinalizeOutcome::Submitted)
    }

    /// Re-send the payload of a failed submission, unchanged.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::NothingToRetry` unless the last attempt
    /// failed, otherwise as [`SubmissionOrchestrator::send`].
    pub async fn retry(&self) -> Result<Submission, SubmissionError> {
        let payload = {
            let mut state = self.lock();
            match std::mem::replace(&mut *state, SubmissionState::InFlight) {
                SubmissionState::Failed(payload) => payload,
                other => {
                    *state = other;
                    return Err(SubmissionError::NothingToRetry);
                }
            }
        };
        tracing::info!(
            session_id = %self.session_id,
            trigger = %payload.trigger,
            "retrying submission"
        );
        self.transmit(payload).await
    }

    /// The accepted submission, once there is one.
    #[must_use]
    pub fn submitted(&self) -> Option<Submission> {
        match &*self.lock() {
            SubmissionState::Submitted(submission) => Some(submission.clone()),
            _ => None,
        }
    }

    /// The payload waiting for `retry`, if the last attempt failed.
    #[must_use]
    pub fn pending_retry(&self) -> Option<SubmissionPayload> {
        match &*self.lock() {
            SubmissionState::Failed(payload) => Some(payload.clone()),
            _ => None,
        }
    }

    async fn transmit(&self, payload: SubmissionPayload) -> Result<Submission, SubmissionError> {
        match self.grading.submit(&payload).await {
            Ok(receipt) => {
                tracing::info!(
                    session_id = %self.session_id,
                    trigger = %payload.trigger,
                    warning_count = payload.warning_count,
                    "submission accepted"
                );
                let submission = Submission { payload, receipt };
                *self.lock() = SubmissionState::Submitted(submission.clone());
                Ok(submission)
            }
            Err(source) => {
                tracing::error!(
                    session_id = %self.session_id,
                    trigger = %payload.trigger,
                    error = %source,
                    "submission failed"
                );
                let trigger = payload.trigger;
                *self.lock() = SubmissionState::Failed(payload);
                Err(failure(trigger, source))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubmissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn failure(trigger: SubmissionTrigger, source: CollaboratorError) -> SubmissionError {
    if trigger.is_automatic() {
        SubmissionError::AutoSubmitFailed { trigger, source }
    } else {
        SubmissionError::Transport { source }
    }
}
