// ============================================================================
// Inference adapter - the black-box `Infer(image, mask) -> image` contract
// ============================================================================
//
// The model is loaded exactly once (at startup) and shared by reference. If
// loading failed, the failure is remembered and every later call reports it
// without touching the backend again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::{Rgb32FImage, RgbImage};

use super::mask::Mask;
use super::scale::{ModelSize, to_unit_float};
use crate::error::FillError;

/// A loaded inpainting backend.
///
/// `predict` receives the masked, normalized input (`region * (1 - mask)`,
/// values in `[0,1]`) and the mask itself, both at [`InpaintModel::input_size`].
/// It must return an RGB float buffer of the same size.
pub trait InpaintModel: Send + Sync {
    /// Human-readable backend name for logs and the status bar.
    fn name(&self) -> &str;

    /// Fixed resolution the model was built for.
    fn input_size(&self) -> ModelSize;

    fn predict(&self, masked: &Rgb32FImage, mask: &Mask) -> Result<Rgb32FImage, String>;
}

/// Process-wide handle to the (possibly failed) model load.
pub struct Inferencer {
    model: Result<Box<dyn InpaintModel>, String>,
    calls: AtomicU64,
}

impl Inferencer {
    pub fn new(model: Box<dyn InpaintModel>) -> Self {
        Self {
            model: Ok(model),
            calls: AtomicU64::new(0),
        }
    }

    /// Record a failed load. Every fill afterwards fails with
    /// [`FillError::ModelUnavailable`] carrying `reason`.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        log_err!("Inpainting model unavailable: {}", reason);
        Self {
            model: Err(reason),
            calls: AtomicU64::new(0),
        }
    }

    /// Wrap the outcome of a loader.
    pub fn from_load<E: std::fmt::Display>(loaded: Result<Box<dyn InpaintModel>, E>) -> Self {
        match loaded {
            Ok(model) => {
                log_info!(
                    "Inpainting model ready: {} ({})",
                    model.name(),
                    model.input_size()
                );
                Self::new(model)
            }
            Err(e) => Self::unavailable(e.to_string()),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn is_available(&self) -> bool {
        self.model.is_ok()
    }

    /// Fails fast with the remembered load error.
    pub fn model(&self) -> Result<&dyn InpaintModel, FillError> {
        match &self.model {
            Ok(m) => Ok(m.as_ref()),
            Err(reason) => Err(FillError::ModelUnavailable(reason.clone())),
        }
    }

    pub fn model_size(&self) -> Result<ModelSize, FillError> {
        Ok(self.model()?.input_size())
    }

    /// Number of backend invocations so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Normalize, mask, run the backend once and validate what comes back.
    ///
    /// Never retries: a failed call is reported as-is.
    pub fn infer(&self, region: &RgbImage, mask: &Mask) -> Result<Rgb32FImage, FillError> {
        let model = self.model()?;
        let size = model.input_size();
        let expected = size.dimensions();

        if region.dimensions() != expected {
            return Err(FillError::ShapeMismatch {
                expected,
                actual: region.dimensions(),
            });
        }
        if mask.dimensions() != expected {
            return Err(FillError::ShapeMismatch {
                expected,
                actual: mask.dimensions(),
            });
        }

        let masked = mask.apply_to(&to_unit_float(region))?;

        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut output = model
            .predict(&masked, mask)
            .map_err(FillError::InferenceError)?;

        if output.dimensions() != expected {
            return Err(FillError::InferenceError(format!(
                "model returned {}x{}, expected {}",
                output.width(),
                output.height(),
                size
            )));
        }
        if output.as_raw().iter().any(|v| !v.is_finite()) {
            return Err(FillError::InferenceError(
                "model output contains NaN or infinite values".to_string(),
            ));
        }
        for v in output.iter_mut() {
            *v = v.clamp(0.0, 1.0);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::geometry::Rect;
    use image::Rgb;
    use std::sync::Mutex;

    /// Records the last input it saw and echoes it back.
    struct Echo {
        size: ModelSize,
        seen: Mutex<Option<Rgb32FImage>>,
    }

    impl InpaintModel for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn input_size(&self) -> ModelSize {
            self.size
        }
        fn predict(&self, masked: &Rgb32FImage, _mask: &Mask) -> Result<Rgb32FImage, String> {
            *self.seen.lock().unwrap() = Some(masked.clone());
            Ok(masked.clone())
        }
    }

    struct Fixed(Rgb32FImage);

    impl InpaintModel for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn input_size(&self) -> ModelSize {
            ModelSize::square(8)
        }
        fn predict(&self, _: &Rgb32FImage, _: &Mask) -> Result<Rgb32FImage, String> {
            Ok(self.0.clone())
        }
    }

    fn echo(side: u32) -> Inferencer {
        Inferencer::new(Box::new(Echo {
            size: ModelSize::square(side),
            seen: Mutex::new(None),
        }))
    }

    #[test]
    fn test_unavailable_fails_fast() {
        let inf = Inferencer::unavailable("no runtime");
        let err = inf
            .infer(&RgbImage::new(8, 8), &Mask::filled(8, 8, 1.0))
            .unwrap_err();
        assert_eq!(err, FillError::ModelUnavailable("no runtime".into()));
        assert_eq!(inf.calls(), 0);
    }

    #[test]
    fn test_masking_convention_applied_before_model() {
        let inf = echo(2);
        let region = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        let raw = vec![1.0, 0.0, 0.5, 0.0];
        let mask = Mask::from_buffer(crate::ops::mask::MaskBuffer::from_raw(2, 2, raw).unwrap());
        let out = inf.infer(&region, &mask).unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [0.0, 0.0, 0.0]);
        assert_eq!(out.get_pixel(1, 0).0, [1.0, 1.0, 1.0]);
        assert!((out.get_pixel(0, 1).0[1] - 0.5).abs() < 1e-6);
        assert_eq!(inf.calls(), 1);
    }

    #[test]
    fn test_rejects_input_at_wrong_resolution() {
        let inf = echo(4);
        let err = inf
            .infer(&RgbImage::new(3, 4), &Mask::full(Rect::new(0, 0, 3, 4)))
            .unwrap_err();
        assert!(matches!(err, FillError::ShapeMismatch { .. }));
        assert_eq!(inf.calls(), 0, "backend must not run on bad input");
    }

    #[test]
    fn test_wrong_output_shape_is_inference_error() {
        let inf = Inferencer::new(Box::new(Fixed(Rgb32FImage::new(4, 4))));
        let err = inf
            .infer(&RgbImage::new(8, 8), &Mask::filled(8, 8, 1.0))
            .unwrap_err();
        assert!(matches!(err, FillError::InferenceError(_)), "got {:?}", err);
    }

    #[test]
    fn test_output_is_clamped_to_unit_range() {
        let inf = Inferencer::new(Box::new(Fixed(Rgb32FImage::from_pixel(
            8,
            8,
            Rgb([1.5, -0.25, 0.5]),
        ))));
        let out = inf
            .infer(&RgbImage::new(8, 8), &Mask::filled(8, 8, 1.0))
            .unwrap();
        assert_eq!(out.get_pixel(3, 3).0, [1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_nan_output_is_inference_error() {
        let inf = Inferencer::new(Box::new(Fixed(Rgb32FImage::from_pixel(
            8,
            8,
            Rgb([f32::NAN, 0.0, 0.0]),
        ))));
        assert!(matches!(
            inf.infer(&RgbImage::new(8, 8), &Mask::filled(8, 8, 1.0)),
            Err(FillError::InferenceError(_))
        ));
    }

    #[test]
    fn test_from_load_keeps_error_text() {
        let loaded: Result<Box<dyn InpaintModel>, String> = Err("model.onnx missing".into());
        let inf = Inferencer::from_load(loaded);
        assert!(!inf.is_available());
        assert_eq!(
            inf.model_size(),
            Err(FillError::ModelUnavailable("model.onnx missing".into()))
        );
    }
}
