//! Camera sampling and host focus tracking.

mod camera;
mod classifier;
mod detector;
mod focus;

pub use camera::{CameraSource, CameraStream, NoCamera};
pub use classifier::FrameClassifier;
pub use detector::{select_detector, FaceDetector, HeuristicDetector};
pub use focus::{FocusTracker, HostSignal};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use exam_core::model::{AssessmentSettings, Frame, ViolationKind};
use storage::repository::StorageError;

use crate::error::CameraError;
use crate::violations::ViolationRecorder;

/// Lifecycle of the proctoring camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorStatus {
    Idle,
    Active,
    /// The camera could not be acquired; focus tracking still runs.
    CameraError(CameraError),
    Stopped,
}

/// A violation that was appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedViolation {
    pub kind: ViolationKind,
    pub warning_count: usize,
}

struct MonitorState {
    status: MonitorStatus,
    classifier: FrameClassifier,
    focus: FocusTracker,
    // set after a failed capture, cleared by the next good one
    interrupted: bool,
}

/// Watches the candidate through the camera and the host's focus signals.
///
/// The monitor only records violations. Deciding whether they end the
/// session belongs to the caller.
pub struct EnvironmentalMonitor {
    recorder: Arc<ViolationRecorder>,
    camera: Arc<dyn CameraSource>,
    detector: Box<dyn FaceDetector>,
    fallback: HeuristicDetector,
    stream: tokio::sync::Mutex<Option<Box<dyn CameraStream>>>,
    state: Mutex<MonitorState>,
}

impl EnvironmentalMonitor {
    #[must_use]
    pub fn new(
        settings: &AssessmentSettings,
        recorder: Arc<ViolationRecorder>,
        camera: Arc<dyn CameraSource>,
        detector: Box<dyn FaceDetector>,
    ) -> Self {
        Self {
            recorder,
            camera,
            detector,
            fallback: HeuristicDetector::from_settings(settings),
            stream: tokio::sync::Mutex::new(None),
            state: Mutex::new(MonitorState {
                status: MonitorStatus::Idle,
                classifier: FrameClassifier::from_settings(settings),
                focus: FocusTracker::new(),
                interrupted: false,
            }),
        }
    }

    #[must_use]
    pub fn status(&self) -> MonitorStatus {
        self.lock().status.clone()
    }

    /// Acquire the camera and begin accepting samples.
    ///
    /// A camera that cannot be opened is recorded as a violation, which is
    /// returned, and leaves the monitor in `MonitorStatus::CameraError`.
    /// Calling this on an active or stopped monitor does nothing.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the violation cannot be persisted.
    pub async fn start_proctoring(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<RecordedViolation>, StorageError> {
        let mut stream = self.stream.lock().await;
        if matches!(
            self.lock().status,
            MonitorStatus::Active | MonitorStatus::Stopped
        ) {
            return Ok(None);
        }

        match self.camera.open().await {
            Ok(opened) => {
                *stream = Some(opened);
                let mut state = self.lock();
                state.status = MonitorStatus::Active;
                state.interrupted = false;
                state.classifier.arm(now);
                tracing::info!(
                    session_id = %self.recorder.session_id(),
                    detector = self.detector.name(),
                    "proctoring started"
                );
                Ok(None)
            }
            Err(err) => {
                tracing::warn!(
                    session_id = %self.recorder.session_id(),
                    error = %err,
                    "camera unavailable"
                );
                self.lock().status = MonitorStatus::CameraError(err);
                self.record(ViolationKind::CameraUnavailable, now)
                    .await
                    .map(Some)
            }
        }
    }

    /// Capture one frame and record whatever it shows.
    ///
    /// Does nothing unless the monitor is active.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if a violation cannot be persisted.
    pub async fn sample(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<RecordedViolation>, StorageError> {
        let kind = {
            let mut stream = self.stream.lock().await;
            let Some(active) = stream.as_mut() else {
                return Ok(None);
            };
            match active.capture().await {
                Ok(frame) => self.classify(&frame, now),
                Err(err) => {
                    let mut state = self.lock();
                    if std::mem::replace(&mut state.interrupted, true) {
                        None
                    } else {
                        tracing::warn!(
                            session_id = %self.recorder.session_id(),
                            error = %err,
                            "camera capture failed"
                        );
                        Some(ViolationKind::CameraInterrupted)
                    }
                }
            }
        };

        match kind {
            Some(kind) => self.record(kind, now).await.map(Some),
            None => Ok(None),
        }
    }

    /// Feed one host visibility or focus change.
    ///
    /// Ignored before proctoring starts and after it stops.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if a violation cannot be persisted.
    pub async fn observe_host(
        &self,
        signal: HostSignal,
        now: DateTime<Utc>,
    ) -> Result<Option<RecordedViolation>, StorageError> {
        let kind = {
            let mut state = self.lock();
            if matches!(state.status, MonitorStatus::Idle | MonitorStatus::Stopped) {
                return Ok(None);
            }
            state.focus.observe(signal)
        };
        match kind {
            Some(kind) => self.record(kind, now).await.map(Some),
            None => Ok(None),
        }
    }

    /// Release the camera and stop accepting samples. Idempotent.
    pub async fn stop_proctoring(&self) {
        let released = self.stream.lock().await.take();
        let was = std::mem::replace(&mut self.lock().status, MonitorStatus::Stopped);
        if let Some(mut stream) = released {
            stream.stop();
        }
        if was != MonitorStatus::Stopped {
            tracing::info!(session_id = %self.recorder.session_id(), "proctoring stopped");
        }
    }

    fn classify(&self, frame: &Frame, now: DateTime<Utc>) -> Option<ViolationKind> {
        let faces = self.detector.detect(frame).unwrap_or_else(|err| {
            tracing::debug!(
                detector = self.detector.name(),
                error = %err,
                "detector failed, using heuristic for this frame"
            );
            self.fallback.detect(frame).unwrap_or(0)
        });
        let mut state = self.lock();
        state.interrupted = false;
        state.classifier.classify(frame.stats(), faces, now)
    }

    async fn record(
        &self,
        kind: ViolationKind,
        now: DateTime<Utc>,
    ) -> Result<RecordedViolation, StorageError> {
        let warning_count = self.recorder.add_warning(kind.clone(), now).await?;
        Ok(RecordedViolation {
            kind,
            warning_count,
        })
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
