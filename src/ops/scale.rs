// ============================================================================
// Model-space scaling - region ↔ fixed model resolution
// ============================================================================
//
// The backend only accepts one input size. The selected region is resized up
// or down to that size, run through the model, and the result is resized back
// to the exact region size before it is written into the image.
//
// Both directions use the triangle filter: when shrinking, `image` widens the
// kernel by the scale factor so it averages over the source area
// (anti-aliased); the kernel is non-negative so a [0,1] mask stays in [0,1]
// without renormalization. Lanczos would ring past the mask range.

use image::imageops::{self, FilterType};
use image::{Rgb32FImage, RgbImage};

use super::mask::Mask;

pub const RESAMPLE_FILTER: FilterType = FilterType::Triangle;

/// Fixed input resolution of the inference backend (width, height).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelSize {
    pub width: u32,
    pub height: u32,
}

impl ModelSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    /// Parse `"512x512"` or a bare `"512"` (square).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (w, h) = match s.split_once(['x', 'X']) {
            Some((w, h)) => (w.trim().parse().ok()?, h.trim().parse().ok()?),
            None => {
                let side = s.parse().ok()?;
                (side, side)
            }
        };
        if w == 0 || h == 0 {
            return None;
        }
        Some(Self::new(w, h))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Default for ModelSize {
    fn default() -> Self {
        Self::square(512)
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Resize a region and its mask to model resolution.
///
/// The region stays 8-bit (normalization happens in the inference adapter);
/// the mask stays a single-channel float buffer with continuous weights.
pub fn to_model_space(region: &RgbImage, mask: &Mask, target: ModelSize) -> (RgbImage, Mask) {
    let (tw, th) = target.dimensions();
    let scaled_region = if region.dimensions() == (tw, th) {
        region.clone()
    } else {
        imageops::resize(region, tw, th, RESAMPLE_FILTER)
    };
    let scaled_mask = if mask.dimensions() == (tw, th) {
        mask.clone()
    } else {
        Mask::from_buffer(imageops::resize(mask.as_buffer(), tw, th, RESAMPLE_FILTER))
    };
    (scaled_region, scaled_mask)
}

/// Resize model output back to the region's exact size and convert the
/// `[0,1]` float intensities to 8-bit (round, then clamp).
pub fn from_model_space(output: &Rgb32FImage, original: (u32, u32)) -> RgbImage {
    let (w, h) = original;
    let resized = if output.dimensions() == (w, h) {
        output.clone()
    } else {
        imageops::resize(output, w, h, RESAMPLE_FILTER)
    };
    let raw: Vec<u8> = resized.as_raw().iter().map(|&v| denormalize(v)).collect();
    // Length is w*h*3 by construction of `resized`
    RgbImage::from_raw(w, h, raw).unwrap_or_else(|| RgbImage::new(w, h))
}

/// `[0,255]` → `[0,1]`.
#[inline]
pub fn normalize(v: u8) -> f32 {
    v as f32 / 255.0
}

/// `[0,1]` → `[0,255]`, rounding to nearest and clamping out-of-range values.
#[inline]
pub fn denormalize(v: f32) -> u8 {
    if !v.is_finite() {
        return 0;
    }
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Convert an 8-bit image to normalized floats.
pub fn to_unit_float(img: &RgbImage) -> Rgb32FImage {
    let raw: Vec<f32> = img.as_raw().iter().map(|&v| normalize(v)).collect();
    let (w, h) = img.dimensions();
    Rgb32FImage::from_raw(w, h, raw).unwrap_or_else(|| Rgb32FImage::new(w, h))
}
