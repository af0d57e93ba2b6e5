//! Camera frames and per-frame metadata
//!
//! A [`CameraFrame`] borrows a buffer from the camera pipeline. Dropping it
//! runs the release hook so the camera can reuse the buffer and keep capturing.

use std::fmt;

use thiserror::Error;

use crate::types::CameraFacing;

/// Bytes per pixel of the RGBA8888 analysis format.
pub const RGBA_BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has zero width or height ({width}x{height})")]
    ZeroDimensions { width: u32, height: u32 },

    #[error("pixel buffer too small: expected {expected} bytes, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("row stride {stride} is smaller than a row of {row_bytes} bytes")]
    InvalidStride { stride: usize, row_bytes: usize },

    #[error("unsupported rotation: {0} degrees")]
    InvalidRotation(u32),
}

/// Sensor rotation needed to make a frame upright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Result<Self, FrameError> {
        match degrees % 360 {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            _ => Err(FrameError::InvalidRotation(degrees)),
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Whether applying this rotation swaps width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// One RGBA8888 frame handed over by the camera.
pub struct CameraFrame {
    width: u32,
    height: u32,
    row_stride: usize,
    rotation: Rotation,
    pixels: Vec<u8>,
    release: Option<ReleaseHook>,
}

impl CameraFrame {
    /// Tightly packed RGBA frame.
    pub fn new(width: u32, height: u32, rotation: Rotation, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            row_stride: width as usize * RGBA_BYTES_PER_PIXEL,
            rotation,
            pixels,
            release: None,
        }
    }

    /// Rows padded to `row_stride` bytes, as camera planes often are.
    pub fn with_row_stride(mut self, row_stride: usize) -> Self {
        self.row_stride = row_stride;
        self
    }

    /// Hook run exactly once when the frame is dropped.
    pub fn on_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl Drop for CameraFrame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for CameraFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("row_stride", &self.row_stride)
            .field("rotation", &self.rotation)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// A camera frame tagged with the facing it was captured from.
#[derive(Debug)]
pub struct CapturedFrame {
    pub frame: CameraFrame,
    pub facing: CameraFacing,
}

/// Capture-time context that travels with a frame through detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Wall-clock capture timestamp (milliseconds since epoch)
    pub timestamp_ms: i64,
    /// Width of the upright model input
    pub width: u32,
    /// Height of the upright model input
    pub height: u32,
    /// Rotation that was applied to make the frame upright
    pub rotation: Rotation,
    /// Camera facing at capture time
    pub facing: CameraFacing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(90), Ok(Rotation::Deg90));
        assert_eq!(Rotation::from_degrees(450), Ok(Rotation::Deg90));
        assert_eq!(Rotation::from_degrees(45), Err(FrameError::InvalidRotation(45)));
        assert!(Rotation::Deg270.swaps_axes());
        assert!(!Rotation::Deg180.swaps_axes());
    }

    #[test]
    fn test_release_runs_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let frame = CameraFrame::new(2, 2, Rotation::Deg0, vec![0; 16])
            .on_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(frame);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
