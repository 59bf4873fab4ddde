#![forbid(unsafe_code)]

pub mod collaborators;
pub mod error;
pub mod exam;
pub mod http;
pub mod monitor;
pub mod progress;
pub mod submission;
pub mod timer;
pub mod violations;

pub use exam_core::Clock;

pub use collaborators::{
    AnswerEntry, CheatEvent, CheatEventSink, DiscardCheatEvents, GradingClient, GradingReceipt,
    QuestionSetLoader, Readiness, SessionStatusProbe, SubmissionPayload,
};
pub use error::{CameraError, CollaboratorError, DetectorError, SessionError, SubmissionError};
pub use exam::{ExamDeps, ExamSession, SessionEvent};
pub use http::{CollaboratorConfig, HttpCollaborators};
pub use monitor::{
    CameraSource, CameraStream, EnvironmentalMonitor, FaceDetector, HeuristicDetector, HostSignal,
    MonitorStatus, NoCamera, RecordedViolation, select_detector,
};
pub use progress::ProgressService;
pub use submission::{
    FinalizeOutcome, FinalizeTicket, PreparedSubmission, Submission, SubmissionOrchestrator,
};
pub use timer::{SessionTimer, TimerTick};
pub use violations::ViolationRecorder;
