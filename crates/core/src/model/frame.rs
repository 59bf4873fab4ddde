use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameError {
    #[error("frame has zero area")]
    Empty,

    #[error("expected {expected} RGBA bytes for {width}x{height}, got {actual}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// One RGBA camera frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

/// Luminance statistics of a frame on the 0..=255 scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub mean_brightness: f64,
    pub std_dev: f64,
}

impl Frame {
    /// Wrap raw RGBA bytes.
    ///
    /// # Errors
    ///
    /// Returns `FrameError` when the frame is empty or the byte count does not
    /// match `width * height * 4`.
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, FrameError> {
        let pixels = usize::try_from(u64::from(width) * u64::from(height)).unwrap_or(usize::MAX);
        if pixels == 0 {
            return Err(FrameError::Empty);
        }
        let expected = pixels.saturating_mul(4);
        if rgba.len() != expected {
            return Err(FrameError::SizeMismatch {
                width,
                height,
                expected,
                actual: rgba.len(),
            });
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    /// A frame where every pixel has the same grey level.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Empty` for a zero-area frame.
    pub fn solid(width: u32, height: u32, level: u8) -> Result<Self, FrameError> {
        let pixels = usize::try_from(u64::from(width) * u64::from(height)).unwrap_or(0);
        Self::from_rgba(width, height, [level, level, level, 255].repeat(pixels))
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// Mean and standard deviation of per-pixel brightness `(r + g + b) / 3`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> FrameStats {
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut count = 0.0;
        for px in self.rgba.chunks_exact(4) {
            let level = (f64::from(px[0]) + f64::from(px[1]) + f64::from(px[2])) / 3.0;
            sum += level;
            sum_sq += level * level;
            count += 1.0;
        }
        if count == 0.0 {
            return FrameStats {
                mean_brightness: 0.0,
                std_dev: 0.0,
            };
        }
        let mean = sum / count;
        let variance = (sum_sq / count - mean * mean).max(0.0);
        FrameStats {
            mean_brightness: mean,
            std_dev: variance.sqrt(),
        }
    }
}
