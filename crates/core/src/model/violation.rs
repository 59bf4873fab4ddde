use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of an integrity concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum ViolationKind {
    CameraCovered,
    MultipleFaces,
    NoFace,
    TabHidden,
    WindowBlurred,
    CameraUnavailable,
    CameraInterrupted,
    Other(String),
}

impl ViolationKind {
    /// Human-readable reason, as sent to the audit sink.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::CameraCovered => "camera covered",
            Self::MultipleFaces => "multiple people detected",
            Self::NoFace => "no face detected",
            Self::TabHidden => "tab switched or minimized",
            Self::WindowBlurred => "window lost focus",
            Self::CameraUnavailable => "camera unavailable",
            Self::CameraInterrupted => "camera stream interrupted",
            Self::Other(reason) => reason,
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// One recorded integrity event. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    kind: ViolationKind,
    timestamp: DateTime<Utc>,
}

impl Violation {
    #[must_use]
    pub fn new(kind: ViolationKind, timestamp: DateTime<Utc>) -> Self {
        Self { kind, timestamp }
    }

    #[must_use]
    pub fn kind(&self) -> &ViolationKind {
        &self.kind
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        self.kind.reason()
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Append-only record of violations for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViolationLedger {
    entries: Vec<Violation>,
}

impl ViolationLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_persisted(entries: Vec<Violation>) -> Self {
        Self { entries }
    }

    /// Append a violation and return the new warning count.
    pub fn append(&mut self, violation: Violation) -> usize {
        self.entries.push(violation);
        self.entries.len()
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn entries(&self) -> &[Violation] {
        &self.entries
    }

    #[must_use]
    pub fn last(&self) -> Option<&Violation> {
        self.entries.last()
    }

    /// Number of entries of the given kind.
    #[must_use]
    pub fn count_of(&self, kind: &ViolationKind) -> usize {
        self.entries.iter().filter(|v| &v.kind == kind).count()
    }
}
