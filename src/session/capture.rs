use crate::models::Snapshot;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
}

/// A camera that has been granted to the session.
pub trait CaptureDevice: Send {
    /// A JPEG frame, or `None` when no frame is ready.
    fn capture_frame(&mut self) -> Option<Vec<u8>>;

    fn release(&mut self);
}

/// Asks the user for camera access.
pub trait CaptureProvider: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

/// Owns an acquired device and releases it exactly once, at the latest on drop.
/// Once released, no further frames are taken.
pub struct CaptureGuard {
    device: Box<dyn CaptureDevice>,
    released: bool,
}

impl CaptureGuard {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self { device, released: false }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn snapshot(&mut self, now: DateTime<Utc>) -> Option<Snapshot> {
        if self.released {
            return None;
        }
        let frame = self.device.capture_frame()?;
        if frame.is_empty() {
            return None;
        }
        Some(Snapshot { image: jpeg_data_url(&frame), timestamp: now })
    }

    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.device.release();
            info!("capture device released");
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.release();
    }
}

pub fn jpeg_data_url(frame: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(frame))
}
