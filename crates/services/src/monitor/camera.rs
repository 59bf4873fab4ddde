use async_trait::async_trait;

use exam_core::model::Frame;

use crate::error::CameraError;

/// Source of camera streams. Only the environmental monitor opens one.
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Acquire the device.
    ///
    /// # Errors
    ///
    /// Returns `CameraError` when permission is denied, no device exists, or
    /// the device cannot be opened.
    async fn open(&self) -> Result<Box<dyn CameraStream>, CameraError>;
}

/// An acquired camera stream.
///
/// Implementations must release every underlying track in `stop`, and also
/// on drop if `stop` was never called.
#[async_trait]
pub trait CameraStream: Send {
    /// # Errors
    ///
    /// Returns `CameraError` if no frame could be read.
    async fn capture(&mut self) -> Result<Frame, CameraError>;

    /// Release the device. Must be safe to call more than once.
    fn stop(&mut self);
}

/// Camera source for hosts without a camera; every open fails with `NoDevice`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCamera;

#[async_trait]
impl CameraSource for NoCamera {
    async fn open(&self) -> Result<Box<dyn CameraStream>, CameraError> {
        Err(CameraError::NoDevice)
    }
}
