use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::progress::{ExamProgress, QuestionStatus};

/// Origin of a finalize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionTrigger {
    User,
    Timer,
    MonitorPolicy,
}

impl SubmissionTrigger {
    /// True for triggers that fire without the test-taker asking.
    #[must_use]
    pub fn is_automatic(self) -> bool {
        !matches!(self, Self::User)
    }
}

impl fmt::Display for SubmissionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Timer => "timer",
            Self::MonitorPolicy => "monitor_policy",
        })
    }
}

/// Scored aggregate computed once at finalize time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSnapshot {
    total_scored: u32,
    attempted: u32,
    not_attempted: u32,
    correct: u32,
    wrong: u32,
    marked_for_review: u32,
    answered_and_marked_for_review: u32,
    submitted_at: DateTime<Utc>,
}

impl ResultSnapshot {
    /// Score `progress`, skipping questions in `unscored_sections`.
    ///
    /// Review-mark tallies cover every question, scored or not. A scored
    /// question with a selection but no correct index counts as wrong.
    #[must_use]
    pub fn compute(
        progress: &ExamProgress,
        unscored_sections: &BTreeSet<u8>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        let mut snapshot = Self {
            total_scored: 0,
            attempted: 0,
            not_attempted: 0,
            correct: 0,
            wrong: 0,
            marked_for_review: 0,
            answered_and_marked_for_review: 0,
            submitted_at,
        };

        let questions = progress.question_set().questions();
        for (question, (_, entry)) in questions.iter().zip(progress.entries()) {
            match entry.status() {
                QuestionStatus::MarkedForReview => snapshot.marked_for_review += 1,
                QuestionStatus::AnsweredAndMarkedForReview => {
                    snapshot.answered_and_marked_for_review += 1;
                }
                _ => {}
            }

            if unscored_sections.contains(&question.section) {
                continue;
            }

            snapshot.total_scored += 1;
            match entry.selected_option() {
                None => snapshot.not_attempted += 1,
                Some(selected) => {
                    snapshot.attempted += 1;
                    if question.is_correct(selected) {
                        snapshot.correct += 1;
                    } else {
                        snapshot.wrong += 1;
                    }
                }
            }
        }

        snapshot
    }

    #[must_use]
    pub fn total_scored(&self) -> u32 {
        self.total_scored
    }

    #[must_use]
    pub fn attempted(&self) -> u32 {
        self.attempted
    }

    #[must_use]
    pub fn not_attempted(&self) -> u32 {
        self.not_attempted
    }

    #[must_use]
    pub fn correct(&self) -> u32 {
        self.correct
    }

    #[must_use]
    pub fn wrong(&self) -> u32 {
        self.wrong
    }

    #[must_use]
    pub fn marked_for_review(&self) -> u32 {
        self.marked_for_review
    }

    #[must_use]
    pub fn answered_and_marked_for_review(&self) -> u32 {
        self.answered_and_marked_for_review
    }

    #[must_use]
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{Question, QuestionId, QuestionSet};
    use crate::time::fixed_now;

    fn three_sections_of_forty() -> Arc<QuestionSet> {
        let mut questions = Vec::new();
        for section in 1..=3u8 {
            for n in 0..40 {
                questions.push(Question {
                    id: QuestionId::new(format!("{section}-{n}")).unwrap(),
                    section,
                    prompt: "p".into(),
                    options: vec!["a".into(), "b".into(), "c".into()],
                    correct_option_index: Some(0),
                });
            }
        }
        Arc::new(QuestionSet::new(questions).unwrap())
    }

    fn unscored() -> BTreeSet<u8> {
        BTreeSet::from([2])
    }

    #[test]
    fn behavioral_section_is_excluded_from_scoring() {
        let progress = ExamProgress::new(three_sections_of_forty());
        let snapshot = ResultSnapshot::compute(&progress, &unscored(), fixed_now());

        assert_eq!(snapshot.total_scored(), 80);
        assert_eq!(snapshot.not_attempted(), 80);
        assert_eq!(snapshot.attempted(), 0);
        assert_eq!(snapshot.submitted_at(), fixed_now());
    }

    #[test]
    fn answers_are_classified_correct_and_wrong() {
        let mut progress = ExamProgress::new(three_sections_of_forty());
        progress.select_option(0).unwrap();
        progress.go_to(1).unwrap();
        progress.select_option(2).unwrap();
        progress.toggle_review();
        // section 2 answers never score
        progress.go_to(45).unwrap();
        progress.select_option(0).unwrap();
        progress.go_to(46).unwrap();
        progress.toggle_review();

        let snapshot = ResultSnapshot::compute(&progress, &unscored(), fixed_now());
        assert_eq!(snapshot.attempted(), 2);
        assert_eq!(snapshot.correct(), 1);
        assert_eq!(snapshot.wrong(), 1);
        assert_eq!(snapshot.not_attempted(), 78);
        assert_eq!(snapshot.answered_and_marked_for_review(), 1);
        assert_eq!(snapshot.marked_for_review(), 1);
    }

    #[test]
    fn missing_correct_index_counts_as_wrong() {
        let set = QuestionSet::new(vec![Question {
            id: QuestionId::new("q").unwrap(),
            section: 1,
            prompt: "p".into(),
            options: vec!["a".into(), "b".into()],
            correct_option_index: None,
        }])
        .unwrap();
        let mut progress = ExamProgress::new(Arc::new(set));
        progress.select_option(0).unwrap();

        let snapshot = ResultSnapshot::compute(&progress, &unscored(), fixed_now());
        assert_eq!(snapshot.correct(), 0);
        assert_eq!(snapshot.wrong(), 1);
    }

    #[test]
    fn only_user_trigger_is_manual() {
        assert!(!SubmissionTrigger::User.is_automatic());
        assert!(SubmissionTrigger::Timer.is_automatic());
        assert_eq!(SubmissionTrigger::MonitorPolicy.to_string(), "monitor_policy");
    }
}
