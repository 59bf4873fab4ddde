use thiserror::Error;

use crate::model::{FrameError, ProgressError, QuestionSetError, SettingsError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    QuestionSet(#[from] QuestionSetError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}
