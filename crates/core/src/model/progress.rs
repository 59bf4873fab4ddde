use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::QuestionId;
use crate::model::question::{Question, QuestionSet};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("question index {index} is out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("question {id} is not part of this session")]
    UnknownQuestion { id: QuestionId },

    #[error("section {section} is not part of this session")]
    UnknownSection { section: u8 },

    #[error("option {option} is out of range for question {id} ({len} options)")]
    OptionOutOfRange {
        id: QuestionId,
        option: usize,
        len: usize,
    },
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Navigation and answer lifecycle of a single question.
///
/// `NotVisited` is only ever an initial state: every transition out of it is
/// one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    NotVisited,
    VisitedNotAnswered,
    Answered,
    MarkedForReview,
    AnsweredAndMarkedForReview,
}

impl QuestionStatus {
    #[must_use]
    pub fn is_answered(self) -> bool {
        matches!(self, Self::Answered | Self::AnsweredAndMarkedForReview)
    }

    #[must_use]
    pub fn is_marked(self) -> bool {
        matches!(self, Self::MarkedForReview | Self::AnsweredAndMarkedForReview)
    }
}

/// Status plus the remembered selection for one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionProgress {
    status: QuestionStatus,
    selected_option: Option<usize>,
}

impl Default for QuestionProgress {
    fn default() -> Self {
        Self {
            status: QuestionStatus::NotVisited,
            selected_option: None,
        }
    }
}

impl QuestionProgress {
    /// Rehydrate a persisted record, repairing a status that disagrees with
    /// the stored selection.
    #[must_use]
    pub fn from_persisted(status: QuestionStatus, selected_option: Option<usize>) -> Self {
        let status = match (status, selected_option) {
            (QuestionStatus::Answered, None) => QuestionStatus::VisitedNotAnswered,
            (QuestionStatus::AnsweredAndMarkedForReview, None) => QuestionStatus::MarkedForReview,
            (other, _) => other,
        };
        let selected_option = if status.is_answered() {
            selected_option
        } else {
            None
        };
        Self {
            status,
            selected_option,
        }
    }

    #[must_use]
    pub fn status(&self) -> QuestionStatus {
        self.status
    }

    #[must_use]
    pub fn selected_option(&self) -> Option<usize> {
        self.selected_option
    }

    /// First navigation to the question.
    pub fn visit(&mut self) {
        if self.status == QuestionStatus::NotVisited {
            self.status = if self.selected_option.is_some() {
                QuestionStatus::Answered
            } else {
                QuestionStatus::VisitedNotAnswered
            };
        }
    }

    /// Record a selection. An existing review mark survives.
    pub fn select(&mut self, option: usize) {
        self.status = if self.status.is_marked() {
            QuestionStatus::AnsweredAndMarkedForReview
        } else {
            QuestionStatus::Answered
        };
        self.selected_option = Some(option);
    }

    /// Drop the selection. An existing review mark survives.
    pub fn clear(&mut self) {
        self.visit();
        self.status = match self.status {
            QuestionStatus::AnsweredAndMarkedForReview => QuestionStatus::MarkedForReview,
            QuestionStatus::Answered => QuestionStatus::VisitedNotAnswered,
            other => other,
        };
        self.selected_option = None;
    }

    /// Flip the review mark, keeping the answered/unanswered half of the state.
    pub fn toggle_review(&mut self) {
        self.visit();
        self.status = match self.status {
            QuestionStatus::VisitedNotAnswered | QuestionStatus::NotVisited => {
                QuestionStatus::MarkedForReview
            }
            QuestionStatus::MarkedForReview => QuestionStatus::VisitedNotAnswered,
            QuestionStatus::Answered => QuestionStatus::AnsweredAndMarkedForReview,
            QuestionStatus::AnsweredAndMarkedForReview => QuestionStatus::Answered,
        };
    }
}

/// Number of questions in each state, for the palette legend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub not_visited: usize,
    pub visited_not_answered: usize,
    pub answered: usize,
    pub marked_for_review: usize,
    pub answered_and_marked_for_review: usize,
}

impl StatusCounts {
    fn add(&mut self, status: QuestionStatus) {
        match status {
            QuestionStatus::NotVisited => self.not_visited += 1,
            QuestionStatus::VisitedNotAnswered => self.visited_not_answered += 1,
            QuestionStatus::Answered => self.answered += 1,
            QuestionStatus::MarkedForReview => self.marked_for_review += 1,
            QuestionStatus::AnsweredAndMarkedForReview => self.answered_and_marked_for_review += 1,
        }
    }
}

//
// ─── EXAM PROGRESS ─────────────────────────────────────────────────────────────
//

/// Progress across the whole question set plus the current position.
///
/// The question currently on screen is always visited: construction,
/// restore and every navigation apply the first-visit rule to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamProgress {
    set: Arc<QuestionSet>,
    entries: Vec<QuestionProgress>,
    current: usize,
}

impl ExamProgress {
    #[must_use]
    pub fn new(set: Arc<QuestionSet>) -> Self {
        let entries = vec![QuestionProgress::default(); set.len()];
        let mut progress = Self {
            set,
            entries,
            current: 0,
        };
        progress.visit_current();
        progress
    }

    /// Merge saved progress against the authoritative set.
    ///
    /// Saved entries for unknown questions are ignored, questions without a
    /// saved entry start `NotVisited`, and selections that no longer fit the
    /// question's options are dropped.
    #[must_use]
    pub fn restore(
        set: Arc<QuestionSet>,
        current: usize,
        saved: impl IntoIterator<Item = (QuestionId, QuestionProgress)>,
    ) -> Self {
        let mut entries = vec![QuestionProgress::default(); set.len()];
        for (id, record) in saved {
            let Some(pos) = set.index_of(&id) else {
                continue;
            };
            let fits = record
                .selected_option
                .is_none_or(|option| set.questions()[pos].has_option(option));
            entries[pos] = if fits {
                record
            } else {
                QuestionProgress::from_persisted(record.status, None)
            };
        }

        let current = if current < set.len() { current } else { 0 };
        let mut progress = Self {
            set,
            entries,
            current,
        };
        progress.visit_current();
        progress
    }

    #[must_use]
    pub fn question_set(&self) -> &Arc<QuestionSet> {
        &self.set
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn current_question(&self) -> &Question {
        &self.set.questions()[self.current]
    }

    #[must_use]
    pub fn current_progress(&self) -> QuestionProgress {
        self.entries[self.current]
    }

    #[must_use]
    pub fn progress_at(&self, index: usize) -> Option<QuestionProgress> {
        self.entries.get(index).copied()
    }

    #[must_use]
    pub fn progress_of(&self, id: &QuestionId) -> Option<QuestionProgress> {
        self.set.index_of(id).map(|pos| self.entries[pos])
    }

    /// `(question id, progress)` pairs in question order.
    pub fn entries(&self) -> impl Iterator<Item = (&QuestionId, QuestionProgress)> + '_ {
        self.set
            .questions()
            .iter()
            .zip(self.entries.iter().copied())
            .map(|(q, p)| (&q.id, p))
    }

    /// Selected option per question, `None` when unanswered.
    #[must_use]
    pub fn answers(&self) -> Vec<(QuestionId, Option<usize>)> {
        self.entries()
            .map(|(id, p)| (id.clone(), p.selected_option()))
            .collect()
    }

    #[must_use]
    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in &self.entries {
            counts.add(entry.status);
        }
        counts
    }

    /// Jump to a question by position (palette click).
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::IndexOutOfRange` if `index` is past the end.
    pub fn go_to(&mut self, index: usize) -> Result<QuestionProgress, ProgressError> {
        if index >= self.entries.len() {
            return Err(ProgressError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        self.current = index;
        self.visit_current();
        Ok(self.current_progress())
    }

    /// Jump to a question by id.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::UnknownQuestion` if the id is not in the set.
    pub fn go_to_question(&mut self, id: &QuestionId) -> Result<QuestionProgress, ProgressError> {
        let index = self
            .set
            .index_of(id)
            .ok_or_else(|| ProgressError::UnknownQuestion { id: id.clone() })?;
        self.go_to(index)
    }

    /// Jump to the first question of a section.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::UnknownSection` if the set has no such section.
    pub fn go_to_section(&mut self, section: u8) -> Result<QuestionProgress, ProgressError> {
        let range = self
            .set
            .section_range(section)
            .ok_or(ProgressError::UnknownSection { section })?;
        self.go_to(range.start)
    }

    /// Move forward one question. Returns false at the last question.
    pub fn next(&mut self) -> bool {
        if self.current + 1 >= self.entries.len() {
            return false;
        }
        self.current += 1;
        self.visit_current();
        true
    }

    /// Move back one question. Returns false at the first question.
    pub fn previous(&mut self) -> bool {
        if self.current == 0 {
            return false;
        }
        self.current -= 1;
        self.visit_current();
        true
    }

    /// Select an option on the current question.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::OptionOutOfRange` if the option does not exist.
    pub fn select_option(&mut self, option: usize) -> Result<QuestionProgress, ProgressError> {
        let question = self.current_question();
        if !question.has_option(option) {
            return Err(ProgressError::OptionOutOfRange {
                id: question.id.clone(),
                option,
                len: question.options.len(),
            });
        }
        let entry = &mut self.entries[self.current];
        entry.select(option);
        Ok(*entry)
    }

    /// Clear the answer on the current question.
    pub fn clear_answer(&mut self) -> QuestionProgress {
        let entry = &mut self.entries[self.current];
        entry.clear();
        *entry
    }

    /// Toggle the review mark on the current question.
    pub fn toggle_review(&mut self) -> QuestionProgress {
        let entry = &mut self.entries[self.current];
        entry.toggle_review();
        *entry
    }

    fn visit_current(&mut self) {
        if let Some(entry) = self.entries.get_mut(self.current) {
            entry.visit();
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
