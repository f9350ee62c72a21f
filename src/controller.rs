// ============================================================================
// Selection controller - pointer events → region fill
// ============================================================================
//
//   Idle ──press──▶ Selecting ──drag──▶ Selecting
//                       │
//                    release ──▶ Filling ──▶ Idle
//
// Works on plain event data, so the same controller drives the egui canvas,
// the CLI and the tests. The controller owns the full-resolution image; a
// worker only ever sees an owned copy of the selected region.

use std::sync::Arc;

use image::RgbImage;
use uuid::Uuid;

use crate::error::FillError;
use crate::ops::geometry::{self, Rect};
use crate::ops::inference::Inferencer;
use crate::pipeline::{self, FillJob, FillOutcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionState {
    Idle,
    Selecting,
    Filling,
}

/// Transient drag state. Reset after every release.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelectionSession {
    pub anchor: Option<(i32, i32)>,
    pub cursor: Option<(i32, i32)>,
    pub active: bool,
}

impl SelectionSession {
    fn begin(x: i32, y: i32) -> Self {
        Self {
            anchor: Some((x, y)),
            cursor: Some((x, y)),
            active: true,
        }
    }

    /// Clamped rubber-band rect for the current drag.
    fn preview(&self, width: u32, height: u32) -> Option<Rect> {
        let anchor = self.anchor?;
        let cursor = self.cursor.unwrap_or(anchor);
        Some(geometry::selection_rect(anchor, cursor, width, height))
    }
}

/// Pointer input in image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerEvent {
    Press(i32, i32),
    Drag(i32, i32),
    Release(i32, i32),
}

/// Whatever shows the image to the user.
pub trait DisplaySurface {
    /// Blit the (updated) image.
    fn present(&mut self, image: &RgbImage);
    /// Draw or clear the rubber-band rectangle.
    fn show_selection(&mut self, rect: Option<Rect>);
    fn set_busy(&mut self, busy: bool);
}

pub struct SelectionController {
    inferencer: Arc<Inferencer>,
    min_size: i32,
    image: Option<RgbImage>,
    document: Uuid,
    state: SelectionState,
    session: SelectionSession,
}

impl SelectionController {
    pub fn new(inferencer: Arc<Inferencer>, min_size: i32) -> Self {
        Self {
            inferencer,
            min_size: min_size.max(1),
            image: None,
            document: Uuid::nil(),
            state: SelectionState::Idle,
            session: SelectionSession::default(),
        }
    }

    pub fn inferencer(&self) -> &Arc<Inferencer> {
        &self.inferencer
    }

    pub fn min_size(&self) -> i32 {
        self.min_size
    }

    /// Values below 1 are treated as 1.
    pub fn set_min_size(&mut self, min_size: i32) {
        self.min_size = min_size.max(1);
    }

    pub fn state(&self) -> SelectionState {
        self.state
    }

    pub fn session(&self) -> SelectionSession {
        self.session
    }

    pub fn image(&self) -> Option<&RgbImage> {
        self.image.as_ref()
    }

    /// Id of the open document, `None` before the first load.
    pub fn document(&self) -> Option<Uuid> {
        self.image.as_ref().map(|_| self.document)
    }

    /// Replace the current image. Any selection or in-flight fill for the
    /// previous image is dropped.
    pub fn load_image(&mut self, image: RgbImage) -> Result<Uuid, FillError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(FillError::InvalidImage(format!(
                "image has no pixels ({}x{})",
                w, h
            )));
        }
        self.document = Uuid::new_v4();
        self.image = Some(image);
        self.state = SelectionState::Idle;
        self.session = SelectionSession::default();
        log_info!("Loaded {}x{} image as document {}", w, h, self.document);
        Ok(self.document)
    }

    /// Give the image back, e.g. after a CLI run.
    pub fn take_image(&mut self) -> Option<RgbImage> {
        self.state = SelectionState::Idle;
        self.session = SelectionSession::default();
        self.image.take()
    }

    fn dimensions(&self) -> Result<(u32, u32), FillError> {
        self.image
            .as_ref()
            .map(|img| img.dimensions())
            .ok_or(FillError::NoImageLoaded)
    }

    /// Current rubber band, if a drag is in progress.
    pub fn preview(&self) -> Option<Rect> {
        if self.state != SelectionState::Selecting {
            return None;
        }
        let (w, h) = self.dimensions().ok()?;
        self.session.preview(w, h)
    }

    pub fn press(&mut self, x: i32, y: i32) -> Result<(), FillError> {
        self.dimensions()?;
        if self.state == SelectionState::Filling {
            return Err(FillError::Busy);
        }
        // A second press while selecting simply starts over.
        self.session = SelectionSession::begin(x, y);
        self.state = SelectionState::Selecting;
        Ok(())
    }

    /// Move the live corner. Returns the preview rect, or `None` when no drag
    /// is in progress.
    pub fn drag(&mut self, x: i32, y: i32) -> Result<Option<Rect>, FillError> {
        let (w, h) = self.dimensions()?;
        if self.state != SelectionState::Selecting {
            return Ok(None);
        }
        self.session.cursor = Some((x, y));
        Ok(self.session.preview(w, h))
    }

    /// End the drag and produce a usable rect. Always resets the session.
    fn end_selection(&mut self, x: i32, y: i32) -> Result<Option<Rect>, FillError> {
        let (w, h) = self.dimensions()?;
        if self.state != SelectionState::Selecting {
            return Ok(None);
        }
        let anchor = self.session.anchor.unwrap_or((x, y));
        self.session = SelectionSession::default();
        self.state = SelectionState::Idle;

        let rect = geometry::selection_rect(anchor, (x, y), w, h);
        if geometry::is_degenerate(rect, self.min_size) {
            log_warn!("Selection {} below minimum size {}", rect, self.min_size);
            return Err(FillError::DegenerateRegion {
                rect,
                min_size: self.min_size,
            });
        }
        Ok(Some(rect))
    }

    /// Release and fill synchronously. Returns the filled rect, or `None` if
    /// no drag was in progress. Back in `Idle` afterwards either way.
    pub fn release(&mut self, x: i32, y: i32) -> Result<Option<Rect>, FillError> {
        let Some(rect) = self.end_selection(x, y)? else {
            return Ok(None);
        };

        self.state = SelectionState::Filling;
        let result = match self.image.as_mut() {
            Some(image) => pipeline::fill_region(image, rect, &self.inferencer),
            None => Err(FillError::NoImageLoaded),
        };
        self.state = SelectionState::Idle;
        result.map(|()| Some(rect))
    }

    /// Release and hand the fill to the caller to run elsewhere. The
    /// controller stays in `Filling` until [`Self::finish_fill`].
    pub fn release_deferred(&mut self, x: i32, y: i32) -> Result<Option<FillJob>, FillError> {
        let Some(rect) = self.end_selection(x, y)? else {
            return Ok(None);
        };
        let image = self.image.as_ref().ok_or(FillError::NoImageLoaded)?;
        match FillJob::prepare(self.document, image, rect, &self.inferencer) {
            Ok(job) => {
                self.state = SelectionState::Filling;
                Ok(Some(job))
            }
            Err(e) => {
                log_err!("Fill of region {} failed: {}", rect, e);
                Err(e)
            }
        }
    }

    /// Apply a worker's result. Returns `Ok(false)` when the result belongs
    /// to an image that has since been replaced.
    pub fn finish_fill(&mut self, outcome: FillOutcome) -> Result<bool, FillError> {
        if outcome.document != self.document || self.state != SelectionState::Filling {
            log_warn!(
                "Discarding fill result for {} (document {} no longer active)",
                outcome.rect,
                outcome.document
            );
            return Ok(false);
        }
        self.state = SelectionState::Idle;

        let written = outcome.result.and_then(|content| match self.image.as_mut() {
            Some(image) => pipeline::commit(image, outcome.rect, &content),
            None => Err(FillError::NoImageLoaded),
        });
        match written {
            Ok(()) => {
                log_info!(
                    "Filled region {} ({}x{}) in {:.0}ms",
                    outcome.rect,
                    outcome.rect.width(),
                    outcome.rect.height(),
                    outcome.elapsed.as_secs_f64() * 1000.0
                );
                Ok(true)
            }
            Err(e) => {
                log_err!("Fill of region {} failed: {}", outcome.rect, e);
                Err(e)
            }
        }
    }

    /// Drive one event through the synchronous path and update `surface`.
    pub fn handle(
        &mut self,
        event: PointerEvent,
        surface: &mut dyn DisplaySurface,
    ) -> Result<(), FillError> {
        match event {
            PointerEvent::Press(x, y) => {
                self.press(x, y)?;
                surface.show_selection(self.preview());
            }
            PointerEvent::Drag(x, y) => {
                if let Some(rect) = self.drag(x, y)? {
                    surface.show_selection(Some(rect));
                }
            }
            PointerEvent::Release(x, y) => {
                if self.state != SelectionState::Selecting {
                    self.dimensions()?;
                    return Ok(());
                }
                surface.show_selection(None);
                surface.set_busy(true);
                let result = self.release(x, y);
                surface.set_busy(false);
                if let (Ok(Some(_)), Some(image)) = (&result, self.image.as_ref()) {
                    surface.present(image);
                }
                result?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::inference::InpaintModel;
    use crate::ops::mask::Mask;
    use crate::ops::scale::ModelSize;
    use image::{Rgb, Rgb32FImage};

    const BG: Rgb<u8> = Rgb([30, 60, 90]);

    /// Returns solid red.
    struct Red;

    impl InpaintModel for Red {
        fn name(&self) -> &str {
            "red"
        }
        fn input_size(&self) -> ModelSize {
            ModelSize::square(8)
        }
        fn predict(&self, _: &Rgb32FImage, _: &Mask) -> Result<Rgb32FImage, String> {
            Ok(Rgb32FImage::from_pixel(8, 8, Rgb([1.0, 0.0, 0.0])))
        }
    }

    #[derive(Default)]
    struct Recorder {
        presented: usize,
        selections: Vec<Option<Rect>>,
        busy: Vec<bool>,
    }

    impl DisplaySurface for Recorder {
        fn present(&mut self, _image: &RgbImage) {
            self.presented += 1;
        }
        fn show_selection(&mut self, rect: Option<Rect>) {
            self.selections.push(rect);
        }
        fn set_busy(&mut self, busy: bool) {
            self.busy.push(busy);
        }
    }

    fn controller() -> SelectionController {
        let mut c = SelectionController::new(Inferencer::new(Box::new(Red)).shared(), 1);
        c.load_image(RgbImage::from_pixel(100, 100, BG)).unwrap();
        c
    }

    fn changed_pixels(c: &SelectionController) -> usize {
        c.image().unwrap().pixels().filter(|p| **p != BG).count()
    }

    #[test]
    fn test_one_pixel_drag_fills_once() {
        let mut c = controller();
        c.press(10, 10).unwrap();
        assert_eq!(c.state(), SelectionState::Selecting);
        assert_eq!(c.drag(20, 20).unwrap(), Some(Rect::new(10, 10, 20, 20)));

        let filled = c.release(11, 11).unwrap();
        assert_eq!(filled, Some(Rect::new(10, 10, 11, 11)));
        assert_eq!(c.inferencer().calls(), 1);
        assert_eq!(*c.image().unwrap().get_pixel(10, 10), Rgb([255, 0, 0]));
        assert_eq!(changed_pixels(&c), 1);
        assert_eq!(c.state(), SelectionState::Idle);
        assert_eq!(c.session(), SelectionSession::default());
    }

    #[test]
    fn test_click_without_drag_is_degenerate() {
        let mut c = controller();
        c.press(10, 10).unwrap();
        c.drag(20, 20).unwrap();
        let err = c.release(10, 10).unwrap_err();
        assert!(matches!(err, FillError::DegenerateRegion { .. }), "got {:?}", err);
        assert!(err.is_user_recoverable());
        assert_eq!(changed_pixels(&c), 0);
        assert_eq!(c.inferencer().calls(), 0);
        assert_eq!(c.state(), SelectionState::Idle);
        assert_eq!(c.session().anchor, None, "anchor left dangling");
    }

    #[test]
    fn test_min_size_boundary() {
        let mut c = controller();
        c.set_min_size(5);
        c.press(0, 0).unwrap();
        assert!(c.release(4, 10).is_err());
        c.press(0, 0).unwrap();
        assert_eq!(c.release(5, 5).unwrap(), Some(Rect::new(0, 0, 5, 5)));

        c.set_min_size(-3);
        assert_eq!(c.min_size(), 1);
    }

    #[test]
    fn test_drag_off_canvas_is_clamped() {
        let mut c = controller();
        c.press(150, 150).unwrap();
        assert_eq!(c.release(90, 95).unwrap(), Some(Rect::new(90, 95, 100, 100)));
        assert_eq!(changed_pixels(&c), 10 * 5);
    }

    #[test]
    fn test_no_image_loaded() {
        let mut c = SelectionController::new(Inferencer::new(Box::new(Red)).shared(), 1);
        assert_eq!(c.press(1, 1), Err(FillError::NoImageLoaded));
        assert_eq!(c.drag(5, 5), Err(FillError::NoImageLoaded));
        assert_eq!(c.release(5, 5), Err(FillError::NoImageLoaded));
        assert_eq!(c.state(), SelectionState::Idle);
        assert_eq!(c.document(), None);
    }

    #[test]
    fn test_model_unavailable_every_time() {
        let mut c = SelectionController::new(Inferencer::unavailable("runtime missing").shared(), 1);
        c.load_image(RgbImage::from_pixel(100, 100, BG)).unwrap();
        for _ in 0..3 {
            c.press(0, 0).unwrap();
            let err = c.release(50, 50).unwrap_err();
            assert_eq!(err, FillError::ModelUnavailable("runtime missing".into()));
            assert_eq!(c.state(), SelectionState::Idle);
        }
        assert_eq!(changed_pixels(&c), 0);
    }

    #[test]
    fn test_out_of_state_events_are_ignored() {
        let mut c = controller();
        assert_eq!(c.drag(5, 5), Ok(None));
        assert_eq!(c.release(5, 5), Ok(None));
        assert_eq!(c.state(), SelectionState::Idle);
        assert_eq!(c.inferencer().calls(), 0);
    }

    #[test]
    fn test_press_while_selecting_reanchors() {
        let mut c = controller();
        c.press(10, 10).unwrap();
        c.press(30, 30).unwrap();
        assert_eq!(c.release(32, 33).unwrap(), Some(Rect::new(30, 30, 32, 33)));
    }

    #[test]
    fn test_deferred_fill_round_trip() {
        let mut c = controller();
        c.press(0, 0).unwrap();
        let job = c.release_deferred(4, 4).unwrap().expect("job");
        assert_eq!(c.state(), SelectionState::Filling);
        assert_eq!(c.press(1, 1), Err(FillError::Busy));
        assert_eq!(changed_pixels(&c), 0, "image touched before the job finished");

        let outcome = job.execute(&Inferencer::new(Box::new(Red)));
        assert_eq!(c.finish_fill(outcome), Ok(true));
        assert_eq!(c.state(), SelectionState::Idle);
        assert_eq!(changed_pixels(&c), 16);
    }

    #[test]
    fn test_deferred_degenerate_release_returns_to_idle() {
        let mut c = controller();
        c.press(10, 10).unwrap();
        c.drag(30, 30).unwrap();
        let err = c.release_deferred(10, 40).unwrap_err();
        assert!(matches!(err, FillError::DegenerateRegion { .. }), "got {:?}", err);
        assert_eq!(c.state(), SelectionState::Idle, "stuck in Filling");
        assert_eq!(c.session().anchor, None, "anchor left dangling");
        assert_eq!(c.inferencer().calls(), 0);

        // The next drag starts fresh
        c.press(0, 0).unwrap();
        assert!(c.release_deferred(3, 3).unwrap().is_some());
    }

    #[test]
    fn test_deferred_release_without_model_never_extracts() {
        let inferencer = Inferencer::unavailable("runtime missing").shared();
        let mut c = SelectionController::new(Arc::clone(&inferencer), 1);
        c.load_image(RgbImage::from_pixel(100, 100, BG)).unwrap();
        for _ in 0..2 {
            c.press(0, 0).unwrap();
            let err = c.release_deferred(50, 50).unwrap_err();
            assert_eq!(err, FillError::ModelUnavailable("runtime missing".into()));
            assert_eq!(c.state(), SelectionState::Idle);
            assert_eq!(c.session().anchor, None);
        }
        assert_eq!(inferencer.calls(), 0);
        assert_eq!(changed_pixels(&c), 0);
    }

    #[test]
    fn test_release_event_while_filling_is_ignored() {
        let mut c = controller();
        let mut surface = Recorder::default();
        c.press(0, 0).unwrap();
        let job = c.release_deferred(4, 4).unwrap().expect("job");

        c.handle(PointerEvent::Release(20, 20), &mut surface).unwrap();
        c.handle(PointerEvent::Drag(25, 25), &mut surface).unwrap();
        assert_eq!(c.state(), SelectionState::Filling);
        assert_eq!(changed_pixels(&c), 0);
        assert_eq!(c.inferencer().calls(), 0);
        assert_eq!(surface.presented, 0);
        assert!(surface.selections.is_empty() && surface.busy.is_empty());

        let outcome = job.execute(c.inferencer());
        assert_eq!(c.finish_fill(outcome), Ok(true));
        assert_eq!(changed_pixels(&c), 16);
    }

    #[test]
    fn test_stale_result_is_discarded() {
        let mut c = controller();
        c.press(0, 0).unwrap();
        let job = c.release_deferred(4, 4).unwrap().expect("job");
        let outcome = job.execute(c.inferencer());

        c.load_image(RgbImage::from_pixel(100, 100, BG)).unwrap();
        assert_eq!(c.finish_fill(outcome), Ok(false));
        assert_eq!(changed_pixels(&c), 0);
    }

    #[test]
    fn test_failed_worker_result_returns_to_idle() {
        let mut c = controller();
        c.press(0, 0).unwrap();
        let job = c.release_deferred(4, 4).unwrap().expect("job");
        let outcome = FillOutcome {
            document: job.document,
            rect: job.rect,
            result: Err(FillError::InferenceError("worker panicked".into())),
            elapsed: std::time::Duration::ZERO,
        };
        assert!(c.finish_fill(outcome).is_err());
        assert_eq!(c.state(), SelectionState::Idle);
        assert_eq!(changed_pixels(&c), 0);
    }

    #[test]
    fn test_handle_drives_surface() {
        let mut c = controller();
        let mut surface = Recorder::default();
        c.handle(PointerEvent::Press(5, 5), &mut surface).unwrap();
        c.handle(PointerEvent::Drag(9, 7), &mut surface).unwrap();
        c.handle(PointerEvent::Release(9, 7), &mut surface).unwrap();

        assert_eq!(
            surface.selections,
            vec![
                Some(Rect::new(5, 5, 5, 5)),
                Some(Rect::new(5, 5, 9, 7)),
                None
            ]
        );
        assert_eq!(surface.busy, vec![true, false]);
        assert_eq!(surface.presented, 1);
    }

    #[test]
    fn test_zero_sized_image_rejected() {
        let mut c = controller();
        let err = c.load_image(RgbImage::new(0, 7)).unwrap_err();
        assert!(matches!(err, FillError::InvalidImage(_)));
        assert!(c.image().is_some(), "previous image must survive a bad load");
    }
}
