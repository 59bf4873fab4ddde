use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use exam_core::model::{ExamProgress, QuestionId, QuestionProgress, QuestionSet, StatusCounts};
use storage::repository::StorageError;
use storage::session_store::{ProgressRecord, SessionStore};

use crate::error::SessionError;

/// Question navigation and answers for one session, persisted on every change.
///
/// Once `lock_edits` runs, every mutation is refused with
/// `SessionError::Locked`. The lock is checked under the same mutex that
/// guards the progress, so a snapshot taken after locking is final.
pub struct ProgressService {
    store: SessionStore,
    progress: Mutex<ExamProgress>,
    locked: AtomicBool,
}

impl ProgressService {
    /// Merge persisted progress against `set`, or start fresh.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read or written.
    pub async fn restore(
        store: SessionStore,
        set: Arc<QuestionSet>,
    ) -> Result<Self, StorageError> {
        let progress = match store.load_progress().await? {
            Some(record) => {
                let current = record.current_index;
                ExamProgress::restore(set, current, record.into_entries())
            }
            None => ExamProgress::new(set),
        };
        // the first visit may have changed a status; keep the store in step
        store
            .save_progress(&ProgressRecord::from_progress(&progress))
            .await?;
        Ok(Self {
            store,
            progress: Mutex::new(progress),
            locked: AtomicBool::new(false),
        })
    }

    /// # Errors
    ///
    /// See [`ProgressService::select_option`].
    pub async fn go_to(&self, index: usize) -> Result<QuestionProgress, SessionError> {
        self.apply(|progress| Ok(progress.go_to(index)?)).await
    }

    /// # Errors
    ///
    /// See [`ProgressService::select_option`].
    pub async fn go_to_question(&self, id: &QuestionId) -> Result<QuestionProgress, SessionError> {
        self.apply(|progress| Ok(progress.go_to_question(id)?)).await
    }

    /// Jump to the first question of `section`.
    ///
    /// # Errors
    ///
    /// See [`ProgressService::select_option`].
    pub async fn go_to_section(&self, section: u8) -> Result<QuestionProgress, SessionError> {
        self.apply(|progress| Ok(progress.go_to_section(section)?)).await
    }

    /// Returns false when already on the last question.
    ///
    /// # Errors
    ///
    /// See [`ProgressService::select_option`].
    pub async fn next(&self) -> Result<bool, SessionError> {
        self.apply(|progress| Ok(progress.next())).await
    }

    /// Returns false when already on the first question.
    ///
    /// # Errors
    ///
    /// See [`ProgressService::select_option`].
    pub async fn previous(&self) -> Result<bool, SessionError> {
        self.apply(|progress| Ok(progress.previous())).await
    }

    /// Select an option on the current question.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Locked` after submission began,
    /// `SessionError::Progress` for an invalid target, and
    /// `SessionError::Storage` if the change cannot be persisted.
    pub async fn select_option(&self, option: usize) -> Result<QuestionProgress, SessionError> {
        self.apply(|progress| Ok(progress.select_option(option)?)).await
    }

    /// # Errors
    ///
    /// See [`ProgressService::select_option`].
    pub async fn clear_answer(&self) -> Result<QuestionProgress, SessionError> {
        self.apply(|progress| Ok(progress.clear_answer())).await
    }

    /// # Errors
    ///
    /// See [`ProgressService::select_option`].
    pub async fn toggle_review(&self) -> Result<QuestionProgress, SessionError> {
        self.apply(|progress| Ok(progress.toggle_review())).await
    }

    pub async fn snapshot(&self) -> ExamProgress {
        self.progress.lock().await.clone()
    }

    pub async fn status_counts(&self) -> StatusCounts {
        self.progress.lock().await.status_counts()
    }

    /// Refuse all further mutations. Waits for an in-flight one to finish.
    pub async fn lock_edits(&self) {
        let _guard = self.progress.lock().await;
        self.locked.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    async fn apply<T>(
        &self,
        op: impl FnOnce(&mut ExamProgress) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let mut progress = self.progress.lock().await;
        if self.is_locked() {
            return Err(SessionError::Locked);
        }
        let out = op(&mut progress)?;
        self.store
            .save_progress(&ProgressRecord::from_progress(&progress))
            .await?;
        Ok(out)
    }
}
