use std::sync::Arc;

use exam_core::model::{
    ExamProgress, QuestionId, QuestionProgress, QuestionStatus, SessionId, TimerState,
    ViolationLedger,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::repository::{KeyValueStore, StorageError};

const KEY_PREFIX: &str = "exam";
const PROGRESS: &str = "progress";
const TIMER: &str = "timer";
const VIOLATIONS: &str = "violations";
const SUBMISSION: &str = "submission";

/// Persisted shape of one question's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntryRecord {
    pub question_id: QuestionId,
    pub status: QuestionStatus,
    #[serde(default)]
    pub selected_option: Option<usize>,
}

/// Persisted shape of answers, statuses and the current position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(default)]
    pub current_index: usize,
    pub entries: Vec<ProgressEntryRecord>,
}

impl ProgressRecord {
    #[must_use]
    pub fn from_progress(progress: &ExamProgress) -> Self {
        Self {
            current_index: progress.current_index(),
            entries: progress
                .entries()
                .map(|(id, p)| ProgressEntryRecord {
                    question_id: id.clone(),
                    status: p.status(),
                    selected_option: p.selected_option(),
                })
                .collect(),
        }
    }

    /// Saved entries as domain values, ready for `ExamProgress::restore`.
    pub fn into_entries(self) -> impl Iterator<Item = (QuestionId, QuestionProgress)> {
        self.entries.into_iter().map(|entry| {
            (
                entry.question_id,
                QuestionProgress::from_persisted(entry.status, entry.selected_option),
            )
        })
    }
}

/// The per-session records, namespaced by session id.
///
/// Records that fail to decode are treated as absent: they are logged,
/// removed, and the caller starts from defaults.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    session_id: SessionId,
}

impl SessionStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, session_id: SessionId) -> Self {
        Self { kv, session_id }
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Key prefix shared by every record of `session_id`.
    #[must_use]
    pub fn prefix_for(session_id: &SessionId) -> String {
        format!("{KEY_PREFIX}:{session_id}:")
    }

    fn key(&self, record: &str) -> String {
        format!("{}{record}", Self::prefix_for(&self.session_id))
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn load_progress(&self) -> Result<Option<ProgressRecord>, StorageError> {
        self.load(PROGRESS).await
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be encoded or stored.
    pub async fn save_progress(&self, record: &ProgressRecord) -> Result<(), StorageError> {
        self.save(PROGRESS, record).await
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn load_timer(&self) -> Result<Option<TimerState>, StorageError> {
        self.load(TIMER).await
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be encoded or stored.
    pub async fn save_timer(&self, state: &TimerState) -> Result<(), StorageError> {
        self.save(TIMER, state).await
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    pub async fn clear_timer(&self) -> Result<(), StorageError> {
        self.kv.remove(&self.key(TIMER)).await
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn load_violations(&self) -> Result<Option<ViolationLedger>, StorageError> {
        self.load(VIOLATIONS).await
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be encoded or stored.
    pub async fn save_violations(&self, ledger: &ViolationLedger) -> Result<(), StorageError> {
        self.save(VIOLATIONS, ledger).await
    }

    /// Submission payload that was built but not yet accepted by the grader.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn load_pending_submission<T: DeserializeOwned>(
        &self,
    ) -> Result<Option<T>, StorageError> {
        self.load(SUBMISSION).await
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the payload cannot be encoded or stored.
    pub async fn save_pending_submission<T: Serialize>(
        &self,
        payload: &T,
    ) -> Result<(), StorageError> {
        self.save(SUBMISSION, payload).await
    }

    /// Remove every record of this session.
    ///
    /// # Errors
    ///
    /// Returns the first `StorageError`; later removals are still attempted.
    pub async fn clear_all(&self) -> Result<(), StorageError> {
        let mut first_err = None;
        for record in [PROGRESS, TIMER, VIOLATIONS, SUBMISSION] {
            if let Err(err) = self.kv.remove(&self.key(record)).await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn load<T: DeserializeOwned>(&self, record: &str) -> Result<Option<T>, StorageError> {
        let key = self.key(record);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    record,
                    error = %err,
                    "discarding corrupt persisted record"
                );
                self.kv.remove(&key).await?;
                Ok(None)
            }
        }
    }

    async fn save<T: Serialize>(&self, record: &str, value: &T) -> Result<(), StorageError> {
        let raw =
            serde_json::to_string(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.kv.set(&self.key(record), &raw).await
    }
}
