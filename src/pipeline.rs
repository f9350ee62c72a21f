// ============================================================================
// Region fill pipeline - extract → mask → scale → infer → scale back → write
// ============================================================================
//
// Split into two halves so the GUI can run the expensive middle on a worker:
//
//   FillJob::prepare  (owner thread)  model check, extract region, build mask
//   FillJob::run      (any thread)    model-space round trip through the model
//   commit            (owner thread)  write the result back into the image
//
// `fill_region` chains all three for the synchronous path.

use std::time::{Duration, Instant};

use image::RgbImage;
use uuid::Uuid;

use crate::error::FillError;
use crate::ops::geometry::Rect;
use crate::ops::inference::Inferencer;
use crate::ops::mask::Mask;
use crate::ops::region;
use crate::ops::scale::{self, ModelSize};

/// Everything a worker needs to restore one region, detached from the image.
#[derive(Clone, Debug)]
pub struct FillJob {
    /// Document the region was taken from.
    pub document: Uuid,
    pub rect: Rect,
    region: RgbImage,
    mask: Mask,
    model_size: ModelSize,
}

/// Result of running a [`FillJob`], sent back to the owner thread.
#[derive(Debug)]
pub struct FillOutcome {
    pub document: Uuid,
    pub rect: Rect,
    pub result: Result<RgbImage, FillError>,
    pub elapsed: Duration,
}

impl FillJob {
    /// Check the model, then copy the region and build its mask.
    ///
    /// The model check comes first: with no backend nothing is extracted.
    pub fn prepare(
        document: Uuid,
        image: &RgbImage,
        rect: Rect,
        inferencer: &Inferencer,
    ) -> Result<Self, FillError> {
        let model_size = inferencer.model_size()?;
        let region = region::extract(image, rect)?;
        let mask = Mask::full(rect);
        Ok(Self {
            document,
            rect,
            region,
            mask,
            model_size,
        })
    }

    /// Width and height of the extracted region.
    pub fn region_size(&self) -> (u32, u32) {
        self.region.dimensions()
    }

    /// Model-space round trip. Returns content with the region's exact shape.
    pub fn run(&self, inferencer: &Inferencer) -> Result<RgbImage, FillError> {
        let (scaled_region, scaled_mask) =
            scale::to_model_space(&self.region, &self.mask, self.model_size);
        let output = inferencer.infer(&scaled_region, &scaled_mask)?;
        Ok(scale::from_model_space(&output, self.region.dimensions()))
    }

    /// Run and package the result with timing, for the worker path.
    pub fn execute(self, inferencer: &Inferencer) -> FillOutcome {
        let start = Instant::now();
        let result = self.run(inferencer);
        FillOutcome {
            document: self.document,
            rect: self.rect,
            result,
            elapsed: start.elapsed(),
        }
    }
}

/// Write restored content back. Leaves `image` untouched on any error.
pub fn commit(image: &mut RgbImage, rect: Rect, content: &RgbImage) -> Result<(), FillError> {
    region::write(image, rect, content)
}

/// Synchronous fill of `rect` in `image`.
///
/// `rect` must already be clamped and checked for size by the caller.
pub fn fill_region(
    image: &mut RgbImage,
    rect: Rect,
    inferencer: &Inferencer,
) -> Result<(), FillError> {
    let start = Instant::now();
    let result = FillJob::prepare(Uuid::nil(), image, rect, inferencer)
        .and_then(|job| job.run(inferencer))
        .and_then(|content| commit(image, rect, &content));

    match &result {
        Ok(()) => log_info!(
            "Filled region {} ({}x{}) in {:.0}ms",
            rect,
            rect.width(),
            rect.height(),
            start.elapsed().as_secs_f64() * 1000.0
        ),
        Err(e) => log_err!("Fill of region {} failed: {}", rect, e),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::inference::InpaintModel;
    use image::{Rgb, Rgb32FImage};

    /// Paints every pixel pure green.
    struct Green;

    impl InpaintModel for Green {
        fn name(&self) -> &str {
            "green"
        }
        fn input_size(&self) -> ModelSize {
            ModelSize::square(16)
        }
        fn predict(&self, _: &Rgb32FImage, _: &Mask) -> Result<Rgb32FImage, String> {
            Ok(Rgb32FImage::from_pixel(16, 16, Rgb([0.0, 1.0, 0.0])))
        }
    }

    struct Broken;

    impl InpaintModel for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn input_size(&self) -> ModelSize {
            ModelSize::square(16)
        }
        fn predict(&self, _: &Rgb32FImage, _: &Mask) -> Result<Rgb32FImage, String> {
            Err("device lost".to_string())
        }
    }

    fn grey(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([90, 90, 90]))
    }

    #[test]
    fn test_fill_replaces_only_the_rect() {
        let inf = Inferencer::new(Box::new(Green));
        let mut img = grey(40, 30);
        let rect = Rect::new(5, 7, 28, 11);
        fill_region(&mut img, rect, &inf).unwrap();
        for (x, y, p) in img.enumerate_pixels() {
            let inside = (5..28).contains(&x) && (7..11).contains(&y);
            let want = if inside { Rgb([0, 255, 0]) } else { Rgb([90, 90, 90]) };
            assert_eq!(*p, want, "pixel ({},{})", x, y);
        }
        assert_eq!(inf.calls(), 1);
    }

    #[test]
    fn test_failed_inference_leaves_image_untouched() {
        let inf = Inferencer::new(Box::new(Broken));
        let mut img = grey(20, 20);
        let err = fill_region(&mut img, Rect::new(0, 0, 10, 10), &inf).unwrap_err();
        assert_eq!(err, FillError::InferenceError("device lost".into()));
        assert_eq!(img, grey(20, 20));
    }

    #[test]
    fn test_prepare_checks_model_before_extracting() {
        let inf = Inferencer::unavailable("not configured");
        // Out of bounds on purpose: extraction would report OutOfBounds.
        let err = FillJob::prepare(Uuid::nil(), &grey(10, 10), Rect::new(0, 0, 50, 50), &inf)
            .unwrap_err();
        assert_eq!(err, FillError::ModelUnavailable("not configured".into()));
    }

    #[test]
    fn test_job_runs_detached_from_image() {
        let inf = Inferencer::new(Box::new(Green));
        let mut img = grey(12, 12);
        let rect = Rect::new(2, 2, 5, 9);
        let job = FillJob::prepare(Uuid::new_v4(), &img, rect, &inf).unwrap();
        assert_eq!(job.region_size(), (3, 7));

        let outcome = job.execute(&inf);
        let content = outcome.result.unwrap();
        assert_eq!(content.dimensions(), (3, 7));
        commit(&mut img, outcome.rect, &content).unwrap();
        assert_eq!(*img.get_pixel(2, 2), Rgb([0, 255, 0]));
        assert_eq!(*img.get_pixel(5, 2), Rgb([90, 90, 90]));
    }
}
