// ============================================================================
// Region extraction / write-back on the full-resolution image
// ============================================================================

use image::RgbImage;

use super::geometry::Rect;
use crate::error::FillError;

/// Check that `rect` lies inside `image` and covers at least one pixel.
/// Returns the rect's origin and size as unsigned values.
fn checked_bounds(image: &RgbImage, rect: Rect) -> Result<(u32, u32, u32, u32), FillError> {
    let (w, h) = image.dimensions();
    if !rect.is_within(w, h) {
        return Err(FillError::OutOfBounds {
            rect,
            width: w,
            height: h,
        });
    }
    if rect.area() == 0 {
        return Err(FillError::EmptyRegion);
    }
    // is_within guarantees every coordinate is non-negative
    Ok((
        rect.x1 as u32,
        rect.y1 as u32,
        rect.width() as u32,
        rect.height() as u32,
    ))
}

/// Copy the pixel block `[y1:y2, x1:x2)` into a new owned image.
pub fn extract(image: &RgbImage, rect: Rect) -> Result<RgbImage, FillError> {
    let (x, y, w, h) = checked_bounds(image, rect)?;
    Ok(image::imageops::crop_imm(image, x, y, w, h).to_image())
}

/// Copy `content` into `image` at `rect`.
///
/// All checks run before the first pixel is touched, so a failed write
/// leaves `image` exactly as it was.
pub fn write(image: &mut RgbImage, rect: Rect, content: &RgbImage) -> Result<(), FillError> {
    let (x, y, w, h) = checked_bounds(image, rect)?;
    if content.dimensions() != (w, h) {
        return Err(FillError::ShapeMismatch {
            expected: (w, h),
            actual: content.dimensions(),
        });
    }
    image::imageops::replace(image, content, x as i64, y as i64);
    Ok(())
}
