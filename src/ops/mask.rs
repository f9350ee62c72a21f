// ============================================================================
// Restoration masks
// ============================================================================
//
// A mask weight of 1.0 means "replace this pixel with model output", 0.0 means
// "keep it". The model input is always `region * (1 - mask)`.

use image::{ImageBuffer, Luma, Rgb32FImage};

use super::geometry::Rect;
use crate::error::FillError;

/// Single-channel float buffer (one weight per pixel).
pub type MaskBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Weight value meaning "restore this pixel".
pub const RESTORE: f32 = 1.0;

/// Per-pixel restoration weights in `[0, 1]`, one channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    buffer: MaskBuffer,
}

impl Mask {
    /// Mask covering all of `rect` (the interactive tool always restores the
    /// whole selection).
    pub fn full(rect: Rect) -> Self {
        let w = rect.width().max(0) as u32;
        let h = rect.height().max(0) as u32;
        Self::filled(w, h, RESTORE)
    }

    pub fn filled(width: u32, height: u32, weight: f32) -> Self {
        Self {
            buffer: MaskBuffer::from_pixel(width, height, Luma([weight.clamp(0.0, 1.0)])),
        }
    }

    /// Wrap an existing buffer. Weights are clamped into `[0, 1]`.
    pub fn from_buffer(mut buffer: MaskBuffer) -> Self {
        for v in buffer.iter_mut() {
            *v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        }
        Self { buffer }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    pub fn as_buffer(&self) -> &MaskBuffer {
        &self.buffer
    }

    /// Raw weights in row-major order, one value per pixel.
    pub fn as_raw(&self) -> &[f32] {
        self.buffer.as_raw()
    }

    /// Blend the mask into a normalized RGB image: `out = rgb * (1 - mask)`.
    ///
    /// The single weight at each pixel is replicated across all three colour
    /// channels. Spatial shapes must match exactly.
    pub fn apply_to(&self, rgb: &Rgb32FImage) -> Result<Rgb32FImage, FillError> {
        if rgb.dimensions() != self.dimensions() {
            return Err(FillError::ShapeMismatch {
                expected: self.dimensions(),
                actual: rgb.dimensions(),
            });
        }
        let mut out = rgb.clone();
        for (px, &m) in out.pixels_mut().zip(self.buffer.as_raw()) {
            let keep = 1.0 - m;
            for c in px.0.iter_mut() {
                *c *= keep;
            }
        }
        Ok(out)
    }
}
