use chrono::{DateTime, Duration, Utc};

use exam_core::model::{AssessmentSettings, FrameStats, ViolationKind};

/// Turns per-frame observations into violations.
///
/// Checks run in priority order: covered lens, more than one face, then a
/// missing face that has lasted past the look-away threshold.
#[derive(Debug, Clone)]
pub struct FrameClassifier {
    brightness_threshold: f64,
    look_away: Duration,
    last_face_at: Option<DateTime<Utc>>,
}

impl FrameClassifier {
    #[must_use]
    pub fn new(brightness_threshold: f64, look_away: Duration) -> Self {
        Self {
            brightness_threshold,
            look_away,
            last_face_at: None,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &AssessmentSettings) -> Self {
        Self::new(settings.brightness_threshold(), settings.look_away())
    }

    /// Start the look-away clock at `now`; called when proctoring begins.
    pub fn arm(&mut self, now: DateTime<Utc>) {
        self.last_face_at = Some(now);
    }

    #[must_use]
    pub fn last_face_at(&self) -> Option<DateTime<Utc>> {
        self.last_face_at
    }

    pub fn classify(
        &mut self,
        stats: FrameStats,
        faces: usize,
        now: DateTime<Utc>,
    ) -> Option<ViolationKind> {
        if stats.mean_brightness < self.brightness_threshold {
            return Some(ViolationKind::CameraCovered);
        }
        match faces {
            0 => {
                let since = *self.last_face_at.get_or_insert(now);
                if now - since > self.look_away {
                    self.last_face_at = Some(now);
                    Some(ViolationKind::NoFace)
                } else {
                    None
                }
            }
            1 => {
                self.last_face_at = Some(now);
                None
            }
            _ => Some(ViolationKind::MultipleFaces),
        }
    }
}
