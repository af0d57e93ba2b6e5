//! Camera frame to model input conversion
//!
//! The hot path of the analyzer. One staging buffer is kept per session and
//! overwritten in place while frame dimensions stay the same.

use image::{imageops, RgbaImage};
use tracing::debug;

use crate::frame::{CameraFrame, FrameError, Rotation, RGBA_BYTES_PER_PIXEL};
use crate::tracing::prefix;

/// Converts camera frames into upright RGBA images for the model.
#[derive(Debug, Default)]
pub struct FramePreparer {
    /// Staging buffer, reallocated only when the incoming size changes
    buffer: Option<RgbaImage>,
    /// Number of staging allocations so far
    allocations: u64,
}

impl FramePreparer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `frame` into the staging buffer, rotate it upright and release
    /// the camera frame before returning.
    ///
    /// The frame is consumed on every path, including errors, so the camera
    /// never waits on a buffer held by the analyzer.
    pub fn prepare(&mut self, frame: CameraFrame) -> Result<RgbaImage, FrameError> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimensions { width, height });
        }

        let row_bytes = width as usize * RGBA_BYTES_PER_PIXEL;
        let stride = frame.row_stride();
        if stride < row_bytes {
            return Err(FrameError::InvalidStride { stride, row_bytes });
        }

        // A stride too large to address saturates and fails the length check
        let expected = stride
            .checked_mul(height as usize - 1)
            .and_then(|rows| rows.checked_add(row_bytes))
            .unwrap_or(usize::MAX);
        if frame.pixels().len() < expected {
            return Err(FrameError::BufferTooSmall {
                expected,
                actual: frame.pixels().len(),
            });
        }

        let reusable = matches!(&self.buffer, Some(buf) if buf.dimensions() == (width, height));
        if !reusable {
            debug!(
                "{} Allocating {}x{} staging buffer",
                prefix::CAMERA,
                width,
                height
            );
            self.buffer = Some(RgbaImage::new(width, height));
            self.allocations += 1;
        }
        let buffer = self
            .buffer
            .get_or_insert_with(|| RgbaImage::new(width, height));

        copy_rows(frame.pixels(), stride, row_bytes, buffer);

        let upright = match frame.rotation() {
            Rotation::Deg0 => buffer.clone(),
            Rotation::Deg90 => imageops::rotate90(&*buffer),
            Rotation::Deg180 => imageops::rotate180(&*buffer),
            Rotation::Deg270 => imageops::rotate270(&*buffer),
        };

        drop(frame);
        Ok(upright)
    }

    /// The current staging buffer, if any frame has been prepared.
    pub fn buffer(&self) -> Option<&RgbaImage> {
        self.buffer.as_ref()
    }

    pub fn allocations(&self) -> u64 {
        self.allocations
    }
}

fn copy_rows(src: &[u8], stride: usize, row_bytes: usize, buffer: &mut RgbaImage) {
    let dst: &mut [u8] = &mut *buffer;
    if stride == row_bytes {
        dst.copy_from_slice(&src[..dst.len()]);
        return;
    }

    for (row, dst_row) in dst.chunks_exact_mut(row_bytes).enumerate() {
        let start = row * stride;
        dst_row.copy_from_slice(&src[start..start + row_bytes]);
    }
}
