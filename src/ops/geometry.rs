// ============================================================================
// Selection geometry - clamp, normalize, degenerate checks
// ============================================================================
//
// Raw pointer coordinates may be negative or beyond the image (the user can
// drag off the canvas). Everything here is total: no panics, no errors.

/// Integer rectangle with exclusive far edges (`x2`, `y2`).
///
/// After [`normalize_rect`] + [`clamp_rect`] the invariant
/// `0 <= x1 <= x2 <= width` and `0 <= y1 <= y2 <= height` holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Width in pixels. Never negative for a normalized rect.
    pub fn width(&self) -> i32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> i32 {
        self.y2.saturating_sub(self.y1)
    }

    /// Pixel count, 0 for empty or inverted rects.
    pub fn area(&self) -> u64 {
        let w = self.width().max(0) as u64;
        let h = self.height().max(0) as u64;
        w * h
    }

    /// True when the rect lies inside `[0,width] x [0,height]`.
    pub fn is_within(&self, width: u32, height: u32) -> bool {
        let (w, h) = (clamp_dim(width), clamp_dim(height));
        self.x1 >= 0
            && self.y1 >= 0
            && self.x1 <= self.x2
            && self.y1 <= self.y2
            && self.x2 <= w
            && self.y2 <= h
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})-({},{})", self.x1, self.y1, self.x2, self.y2)
    }
}

/// Image dimensions as `i32`, saturating for absurd sizes.
#[inline]
fn clamp_dim(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

/// Restrict `coord` to `[lo, hi]`. Unlike `i32::clamp` this never panics;
/// if `lo > hi` the lower bound wins.
#[inline]
pub fn clamp_coord(coord: i32, lo: i32, hi: i32) -> i32 {
    coord.min(hi).max(lo)
}

/// Order the endpoints of a drag so that `x1 <= x2` and `y1 <= y2`.
pub fn normalize_rect(x1: i32, y1: i32, x2: i32, y2: i32) -> Rect {
    Rect {
        x1: x1.min(x2),
        y1: y1.min(y2),
        x2: x1.max(x2),
        y2: y1.max(y2),
    }
}

/// Clamp all four coordinates into `[0,width] x [0,height]`.
pub fn clamp_rect(rect: Rect, width: u32, height: u32) -> Rect {
    let (w, h) = (clamp_dim(width), clamp_dim(height));
    Rect {
        x1: clamp_coord(rect.x1, 0, w),
        y1: clamp_coord(rect.y1, 0, h),
        x2: clamp_coord(rect.x2, 0, w),
        y2: clamp_coord(rect.y2, 0, h),
    }
}

/// True iff the rect is narrower or shorter than `min_size`.
/// A side exactly `min_size` long is usable.
pub fn is_degenerate(rect: Rect, min_size: i32) -> bool {
    rect.width() < min_size || rect.height() < min_size
}

/// Normalize then clamp: the full path from two raw pointer positions to an
/// in-bounds rect.
pub fn selection_rect(anchor: (i32, i32), cursor: (i32, i32), width: u32, height: u32) -> Rect {
    clamp_rect(
        normalize_rect(anchor.0, anchor.1, cursor.0, cursor.1),
        width,
        height,
    )
}
