use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::QuestionId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionSetError {
    #[error("question set is empty")]
    Empty,

    #[error("section numbers start at 1 (question {id})")]
    InvalidSection { id: QuestionId },

    #[error("question {id} has no options")]
    NoOptions { id: QuestionId },

    #[error("question {id} appears more than once")]
    DuplicateId { id: QuestionId },

    #[error("section {section} has {actual} questions, expected {expected}")]
    ShortSection {
        section: u8,
        expected: usize,
        actual: usize,
    },
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// A single multiple-choice question supplied by the question-set loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub section: u8,
    pub prompt: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub correct_option_index: Option<usize>,
}

impl Question {
    /// Returns true when `option` is a valid index into this question's options.
    #[must_use]
    pub fn has_option(&self, option: usize) -> bool {
        option < self.options.len()
    }

    /// Returns true only if a correct index exists and matches `selected`.
    #[must_use]
    pub fn is_correct(&self, selected: usize) -> bool {
        self.correct_option_index == Some(selected)
    }
}

//
// ─── QUESTION SET ──────────────────────────────────────────────────────────────
//

/// The ordered, sectioned questions of one session.
///
/// Questions are kept in section order; the relative order inside a section
/// is the order the loader returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSet {
    questions: Vec<Question>,
    index: HashMap<QuestionId, usize>,
}

impl QuestionSet {
    /// Build a question set without per-section expectations.
    ///
    /// # Errors
    ///
    /// Returns `QuestionSetError` when the set is empty or a question is malformed.
    pub fn new(questions: Vec<Question>) -> Result<Self, QuestionSetError> {
        Self::with_expected(questions, &BTreeMap::new())
    }

    /// Build a question set, refusing it when any section is short.
    ///
    /// `expected` maps a section number to the number of questions the loader
    /// must supply for it. Extra questions are accepted.
    ///
    /// # Errors
    ///
    /// Returns `QuestionSetError::ShortSection` for the first section that has
    /// fewer questions than expected, or another variant for malformed input.
    pub fn with_expected(
        mut questions: Vec<Question>,
        expected: &BTreeMap<u8, usize>,
    ) -> Result<Self, QuestionSetError> {
        if questions.is_empty() {
            return Err(QuestionSetError::Empty);
        }

        let mut per_section: BTreeMap<u8, usize> = BTreeMap::new();
        for question in &questions {
            if question.section == 0 {
                return Err(QuestionSetError::InvalidSection {
                    id: question.id.clone(),
                });
            }
            if question.options.is_empty() {
                return Err(QuestionSetError::NoOptions {
                    id: question.id.clone(),
                });
            }
            *per_section.entry(question.section).or_default() += 1;
        }

        for (&section, &want) in expected {
            let actual = per_section.get(&section).copied().unwrap_or(0);
            if actual < want {
                return Err(QuestionSetError::ShortSection {
                    section,
                    expected: want,
                    actual,
                });
            }
        }

        // stable: keeps loader order inside each section
        questions.sort_by_key(|q| q.section);

        let mut index = HashMap::with_capacity(questions.len());
        for (pos, question) in questions.iter().enumerate() {
            if index.insert(question.id.clone(), pos).is_some() {
                return Err(QuestionSetError::DuplicateId {
                    id: question.id.clone(),
                });
            }
        }

        Ok(Self { questions, index })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    #[must_use]
    pub fn by_id(&self, id: &QuestionId) -> Option<&Question> {
        self.index_of(id).map(|pos| &self.questions[pos])
    }

    #[must_use]
    pub fn index_of(&self, id: &QuestionId) -> Option<usize> {
        self.index.get(id).copied()
    }

    #[must_use]
    pub fn contains(&self, id: &QuestionId) -> bool {
        self.index.contains_key(id)
    }

    /// Distinct section numbers in ascending order.
    #[must_use]
    pub fn sections(&self) -> Vec<u8> {
        let mut sections: Vec<u8> = self.questions.iter().map(|q| q.section).collect();
        sections.dedup();
        sections
    }

    /// Index range covered by `section`, or `None` if the section is absent.
    #[must_use]
    pub fn section_range(&self, section: u8) -> Option<Range<usize>> {
        let start = self.questions.iter().position(|q| q.section == section)?;
        let len = self.questions[start..]
            .iter()
            .take_while(|q| q.section == section)
            .count();
        Some(start..start + len)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
