mod frame;
mod ids;
mod progress;
mod question;
mod result;
mod settings;
mod timer;
mod violation;

pub use frame::{Frame, FrameError, FrameStats};
pub use ids::{ParseIdError, QuestionId, SessionId};
pub use progress::{ExamProgress, ProgressError, QuestionProgress, QuestionStatus, StatusCounts};
pub use question::{Question, QuestionSet, QuestionSetError};
pub use result::{ResultSnapshot, SubmissionTrigger};
pub use settings::{AssessmentSettings, AssessmentSettingsDraft, SettingsError};
pub use timer::{TimerRecovery, TimerState};
pub use violation::{Violation, ViolationKind, ViolationLedger};
