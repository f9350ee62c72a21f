use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{Rgb, Rgb32FImage, RgbImage};
use inpaintfe::ops::mask::Mask;
use inpaintfe::pipeline::{FillJob, fill_region};
use inpaintfe::{
    FillError, Inferencer, InpaintModel, ModelSize, PointerEvent, Rect, SelectionController,
    SelectionState,
};

// --- Stub models ---------------------------------------------------

/// Returns its (masked) input unchanged.
struct Identity(ModelSize);

impl InpaintModel for Identity {
    fn name(&self) -> &str {
        "identity"
    }
    fn input_size(&self) -> ModelSize {
        self.0
    }
    fn predict(&self, masked: &Rgb32FImage, _: &Mask) -> Result<Rgb32FImage, String> {
        Ok(masked.clone())
    }
}

/// Paints one flat colour and counts how often it ran.
struct Constant {
    size: ModelSize,
    colour: [f32; 3],
    runs: Arc<AtomicUsize>,
}

impl InpaintModel for Constant {
    fn name(&self) -> &str {
        "constant"
    }
    fn input_size(&self) -> ModelSize {
        self.size
    }
    fn predict(&self, _: &Rgb32FImage, mask: &Mask) -> Result<Rgb32FImage, String> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        assert_eq!(mask.dimensions(), self.size.dimensions(), "mask not at model size");
        let (w, h) = self.size.dimensions();
        Ok(Rgb32FImage::from_pixel(w, h, Rgb(self.colour)))
    }
}

struct Failing;

impl InpaintModel for Failing {
    fn name(&self) -> &str {
        "failing"
    }
    fn input_size(&self) -> ModelSize {
        ModelSize::square(32)
    }
    fn predict(&self, _: &Rgb32FImage, _: &Mask) -> Result<Rgb32FImage, String> {
        Err("out of memory".to_string())
    }
}

/// Ignores its declared size in the output.
struct WrongShape;

impl InpaintModel for WrongShape {
    fn name(&self) -> &str {
        "wrong-shape"
    }
    fn input_size(&self) -> ModelSize {
        ModelSize::square(32)
    }
    fn predict(&self, _: &Rgb32FImage, _: &Mask) -> Result<Rgb32FImage, String> {
        Ok(Rgb32FImage::new(31, 32))
    }
}

fn constant(colour: [f32; 3]) -> (Arc<Inferencer>, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let model = Constant {
        size: ModelSize::default(),
        colour,
        runs: Arc::clone(&runs),
    };
    (Inferencer::new(Box::new(model)).shared(), runs)
}

fn photo(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 7) as u8]))
}

// --- Tests ---------------------------------------------------------

#[test]
fn drag_and_release_fills_selection_only() {
    let (inferencer, runs) = constant([0.0, 0.0, 1.0]);
    let mut controller = SelectionController::new(inferencer, 1);
    let original = photo(100, 100);
    controller.load_image(original.clone()).unwrap();

    controller.press(60, 60).unwrap();
    controller.drag(50, 45).unwrap();
    assert_eq!(controller.release(40, 40).unwrap(), Some(Rect::new(40, 40, 60, 60)));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let image = controller.image().unwrap();
    for (x, y, p) in image.enumerate_pixels() {
        if (40..60).contains(&x) && (40..60).contains(&y) {
            assert_eq!(*p, Rgb([0, 0, 255]), "pixel ({},{}) not filled", x, y);
        } else {
            assert_eq!(p, original.get_pixel(x, y), "pixel ({},{}) changed", x, y);
        }
    }
}

#[test]
fn selection_clamped_to_image_edges() {
    let (inferencer, _) = constant([1.0, 1.0, 1.0]);
    let mut controller = SelectionController::new(inferencer, 1);
    controller.load_image(photo(100, 100)).unwrap();

    controller.press(-5, -5).unwrap();
    assert_eq!(controller.release(50, 50).unwrap(), Some(Rect::new(0, 0, 50, 50)));
}

#[test]
fn identity_model_with_full_mask_blacks_out_region() {
    // Full mask means the model sees region * (1 - 1) = 0 everywhere.
    let inferencer = Inferencer::new(Box::new(Identity(ModelSize::new(64, 48))));
    let mut image = photo(30, 30);
    fill_region(&mut image, Rect::new(3, 4, 20, 9), &inferencer).unwrap();
    for y in 4..9 {
        for x in 3..20 {
            assert_eq!(*image.get_pixel(x, y), Rgb([0, 0, 0]));
        }
    }
    assert_eq!(*image.get_pixel(2, 4), *photo(30, 30).get_pixel(2, 4));
}

#[test]
fn failures_leave_image_untouched_and_return_to_idle() {
    for model in [Box::new(Failing) as Box<dyn InpaintModel>, Box::new(WrongShape)] {
        let mut controller = SelectionController::new(Inferencer::new(model).shared(), 1);
        controller.load_image(photo(64, 64)).unwrap();
        controller.press(0, 0).unwrap();
        let err = controller.release(40, 40).unwrap_err();
        assert!(matches!(err, FillError::InferenceError(_)), "got {:?}", err);
        assert!(!err.is_user_recoverable());
        assert_eq!(controller.image().unwrap(), &photo(64, 64));
        assert_eq!(controller.state(), SelectionState::Idle);
        assert_eq!(controller.session().anchor, None);
    }
}

#[test]
fn unavailable_model_fails_every_fill() {
    let inferencer = Inferencer::unavailable("libonnxruntime.so: cannot open shared object file").shared();
    let mut controller = SelectionController::new(Arc::clone(&inferencer), 1);
    controller.load_image(photo(100, 100)).unwrap();

    for i in 0..3 {
        controller.press(i, i).unwrap();
        match controller.release(50 + i, 50 + i) {
            Err(FillError::ModelUnavailable(reason)) => assert!(reason.contains("libonnxruntime")),
            other => panic!("attempt {}: expected ModelUnavailable, got {:?}", i, other),
        }
    }
    assert_eq!(inferencer.calls(), 0);
    assert_eq!(controller.image().unwrap(), &photo(100, 100));
}

#[test]
fn worker_path_runs_on_another_thread() {
    let (inferencer, runs) = constant([1.0, 0.0, 0.0]);
    let mut controller = SelectionController::new(Arc::clone(&inferencer), 1);
    controller.load_image(photo(50, 50)).unwrap();

    controller.press(10, 10).unwrap();
    let job: FillJob = controller.release_deferred(20, 30).unwrap().expect("fill job");
    assert_eq!(controller.state(), SelectionState::Filling);

    let (tx, rx) = std::sync::mpsc::channel();
    let worker_inf = Arc::clone(&inferencer);
    rayon::spawn(move || {
        let _ = tx.send(job.execute(&worker_inf));
    });
    let outcome = rx.recv().unwrap();

    assert_eq!(controller.finish_fill(outcome), Ok(true));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(*controller.image().unwrap().get_pixel(15, 25), Rgb([255, 0, 0]));
    assert_eq!(controller.state(), SelectionState::Idle);
}

#[test]
fn pointer_events_without_image_report_no_image() {
    let (inferencer, _) = constant([0.0, 0.0, 0.0]);
    let mut controller = SelectionController::new(inferencer, 1);
    let mut surface = NullSurface;
    for event in [
        PointerEvent::Press(1, 1),
        PointerEvent::Drag(2, 2),
        PointerEvent::Release(3, 3),
    ] {
        assert_eq!(controller.handle(event, &mut surface), Err(FillError::NoImageLoaded));
    }
}

struct NullSurface;

impl inpaintfe::DisplaySurface for NullSurface {
    fn present(&mut self, _: &RgbImage) {}
    fn show_selection(&mut self, _: Option<Rect>) {}
    fn set_busy(&mut self, _: bool) {}
}
