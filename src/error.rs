// ============================================================================
// Fill errors - everything that can stop a region fill
// ============================================================================

use crate::ops::geometry::Rect;

/// Errors produced by the selection controller and the fill pipeline.
///
/// None of these leave the image half-written: the write-back step only runs
/// after every earlier stage succeeded.
#[derive(Debug, Clone, PartialEq)]
pub enum FillError {
    /// A pointer event arrived before any image was opened.
    NoImageLoaded,
    /// The clamped selection is smaller than the configured minimum size.
    DegenerateRegion { rect: Rect, min_size: i32 },
    /// The rect covers zero pixels.
    EmptyRegion,
    /// The rect is not contained in the image it is applied to.
    OutOfBounds { rect: Rect, width: u32, height: u32 },
    /// A buffer handed to a stage does not have the shape that stage requires.
    ShapeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// The inference backend failed to load at startup.
    ModelUnavailable(String),
    /// The backend was loaded but the call failed or returned garbage.
    InferenceError(String),
    /// A fill is already in flight for this image.
    Busy,
    /// The decoded image cannot be edited (zero width or height).
    InvalidImage(String),
}

impl FillError {
    /// Conditions the user fixes by simply trying again (shown as a hint,
    /// not as a failure).
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            FillError::NoImageLoaded | FillError::DegenerateRegion { .. } | FillError::Busy
        )
    }
}

impl std::fmt::Display for FillError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillError::NoImageLoaded => write!(f, "No image loaded"),
            FillError::DegenerateRegion { rect, min_size } => write!(
                f,
                "Selected region is too small ({}x{}, minimum {}x{})",
                rect.width(),
                rect.height(),
                min_size,
                min_size
            ),
            FillError::EmptyRegion => write!(f, "Region to fill is empty"),
            FillError::OutOfBounds {
                rect,
                width,
                height,
            } => write!(f, "Region {} lies outside the {}x{} image", rect, width, height),
            FillError::ShapeMismatch { expected, actual } => write!(
                f,
                "Buffer shape mismatch: expected {}x{}, got {}x{}",
                expected.0, expected.1, actual.0, actual.1
            ),
            FillError::ModelUnavailable(e) => write!(f, "Inpainting model unavailable: {}", e),
            FillError::InferenceError(e) => write!(f, "Inference failed: {}", e),
            FillError::Busy => write!(f, "A region is still being filled"),
            FillError::InvalidImage(e) => write!(f, "Invalid image: {}", e),
        }
    }
}

impl std::error::Error for FillError {}
