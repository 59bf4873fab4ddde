//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::model::{ProgressError, QuestionSetError, SessionId, SubmissionTrigger};
use storage::repository::StorageError;

/// Errors emitted by external collaborators (loader, probe, grading, audit).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CollaboratorError {
    #[error("collaborator is not configured")]
    Disabled,
    #[error("request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while acquiring or reading the camera.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("no camera device found")]
    NoDevice,
    #[error("camera stream ended")]
    StreamEnded,
    #[error("camera error: {0}")]
    Other(String),
}

/// Errors raised by face-detection strategies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DetectorError {
    #[error("face detection model failed to load: {0}")]
    ModelLoad(String),
    #[error("face detection failed: {0}")]
    Detection(String),
}

/// Errors emitted by the submission orchestrator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubmissionError {
    /// A user-initiated submission failed; `retry` may re-send it.
    #[error("submission failed to send: {source}")]
    Transport {
        #[source]
        source: CollaboratorError,
    },
    /// A timer or monitor submission failed; the session is locked.
    #[error("automatic submission ({trigger}) failed to save: {source}")]
    AutoSubmitFailed {
        trigger: SubmissionTrigger,
        #[source]
        source: CollaboratorError,
    },
    #[error("no failed submission to retry")]
    NothingToRetry,
}

/// Errors emitted by exam sessions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("session {0} is still being prepared")]
    Preparing(SessionId),
    #[error("question set is not ready: {0}")]
    NotReady(#[from] QuestionSetError),
    #[error("session is locked for submission")]
    Locked,
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
