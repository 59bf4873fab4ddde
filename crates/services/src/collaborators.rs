//! Contracts with the surrounding application.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use exam_core::model::{
    ExamProgress, Question, QuestionId, ResultSnapshot, SessionId, SubmissionTrigger,
};

use crate::error::CollaboratorError;

/// Whether the question set behind a session can be fetched yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Preparing,
}

#[async_trait]
pub trait SessionStatusProbe: Send + Sync {
    /// # Errors
    ///
    /// Returns `CollaboratorError` if the status cannot be fetched.
    async fn status(&self, session_id: &SessionId) -> Result<Readiness, CollaboratorError>;
}

#[async_trait]
pub trait QuestionSetLoader: Send + Sync {
    /// Full question list for the session.
    ///
    /// # Errors
    ///
    /// Returns `CollaboratorError` if the questions cannot be fetched.
    async fn load(&self, session_id: &SessionId) -> Result<Vec<Question>, CollaboratorError>;
}

/// One question's answer as transmitted for grading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEntry {
    pub question_id: QuestionId,
    pub selected_option_index: Option<usize>,
}

/// Everything the grading collaborator receives, exactly once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub session_id: SessionId,
    pub answers: Vec<AnswerEntry>,
    pub result: ResultSnapshot,
    pub warning_count: usize,
    pub trigger: SubmissionTrigger,
}

impl SubmissionPayload {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        progress: &ExamProgress,
        result: ResultSnapshot,
        warning_count: usize,
        trigger: SubmissionTrigger,
    ) -> Self {
        let answers = progress
            .answers()
            .into_iter()
            .map(|(question_id, selected_option_index)| AnswerEntry {
                question_id,
                selected_option_index,
            })
            .collect();
        Self {
            session_id,
            answers,
            result,
            warning_count,
            trigger,
        }
    }
}

/// Grading response; the host uses it to navigate onward.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingReceipt {
    #[serde(default)]
    pub result_id: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub next_url: Option<String>,
}

#[async_trait]
pub trait GradingClient: Send + Sync {
    /// # Errors
    ///
    /// Returns `CollaboratorError` if the submission is not accepted.
    async fn submit(&self, payload: &SubmissionPayload)
    -> Result<GradingReceipt, CollaboratorError>;
}

/// Audit record of one violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheatEvent {
    pub session_id: SessionId,
    pub reason: String,
    pub warning_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait CheatEventSink: Send + Sync {
    /// # Errors
    ///
    /// Returns `CollaboratorError` if the event is not accepted. Callers only
    /// log this.
    async fn record(&self, event: &CheatEvent) -> Result<(), CollaboratorError>;
}

/// Sink that drops every event, for hosts without an audit endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardCheatEvents;

#[async_trait]
impl CheatEventSink for DiscardCheatEvents {
    async fn record(&self, _event: &CheatEvent) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use exam_core::model::QuestionSet;
    use exam_core::time::fixed_now;

    fn progress() -> ExamProgress {
        let questions = ["q1", "q2"]
            .into_iter()
            .map(|id| Question {
                id: QuestionId::new(id).unwrap(),
                section: 1,
                prompt: String::new(),
                options: vec!["a".into(), "b".into()],
                correct_option_index: Some(1),
            })
            .collect();
        let mut progress = ExamProgress::new(Arc::new(QuestionSet::new(questions).unwrap()));
        progress.select_option(1).unwrap();
        progress
    }

    #[test]
    fn payload_lists_every_question_with_null_for_unanswered() {
        let progress = progress();
        let result = ResultSnapshot::compute(&progress, &BTreeSet::new(), fixed_now());
        let payload = SubmissionPayload::new(
            SessionId::new("s-9").unwrap(),
            &progress,
            result,
            2,
            SubmissionTrigger::MonitorPolicy,
        );

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["sessionId"], "s-9");
        assert_eq!(json["warningCount"], 2);
        assert_eq!(json["trigger"], "monitor_policy");
        assert_eq!(json["answers"][0]["questionId"], "q1");
        assert_eq!(json["answers"][0]["selectedOptionIndex"], 1);
        assert!(json["answers"][1]["selectedOptionIndex"].is_null());
        assert_eq!(json["result"]["totalScored"], 2);
        assert_eq!(json["result"]["correct"], 1);
    }

    #[test]
    fn receipt_tolerates_missing_fields() {
        let receipt: GradingReceipt = serde_json::from_str(r#"{"resultId":"r-7"}"#).unwrap();
        assert_eq!(receipt.result_id.as_deref(), Some("r-7"));
        assert_eq!(receipt.next_url, None);

        let readiness: Readiness = serde_json::from_str(r#""preparing""#).unwrap();
        assert_eq!(readiness, Readiness::Preparing);
    }
}
