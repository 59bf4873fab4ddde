use exam_core::model::{AssessmentSettings, Frame};

use crate::error::DetectorError;

/// Face-counting strategy.
pub trait FaceDetector: Send + Sync {
    /// Number of faces in `frame`.
    ///
    /// # Errors
    ///
    /// Returns `DetectorError::Detection` if the frame cannot be analysed.
    fn detect(&self, frame: &Frame) -> Result<usize, DetectorError>;

    fn name(&self) -> &'static str;
}

/// Coarse fallback: a frame that is bright and textured enough counts as one
/// face, anything else as none. It can never report multiple faces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicDetector {
    brightness_threshold: f64,
    variance_threshold: f64,
}

impl HeuristicDetector {
    #[must_use]
    pub fn new(brightness_threshold: f64, variance_threshold: f64) -> Self {
        Self {
            brightness_threshold,
            variance_threshold,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &AssessmentSettings) -> Self {
        Self::new(
            settings.brightness_threshold(),
            settings.variance_threshold(),
        )
    }
}

impl FaceDetector for HeuristicDetector {
    fn detect(&self, frame: &Frame) -> Result<usize, DetectorError> {
        let stats = frame.stats();
        let plausible = stats.mean_brightness >= self.brightness_threshold
            && stats.std_dev >= self.variance_threshold;
        Ok(usize::from(plausible))
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

/// Pick the model-backed detector, or the heuristic when the model fails to load.
pub fn select_detector<F>(settings: &AssessmentSettings, load_model: F) -> Box<dyn FaceDetector>
where
    F: FnOnce() -> Result<Box<dyn FaceDetector>, DetectorError>,
{
    match load_model() {
        Ok(detector) => {
            tracing::info!(detector = detector.name(), "face detector loaded");
            detector
        }
        Err(err) => {
            tracing::warn!(error = %err, "falling back to heuristic face detection");
            Box::new(HeuristicDetector::from_settings(settings))
        }
    }
}
