use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::time::Duration;

use eframe::egui;
use egui::{Color32, ColorImage, Pos2, Sense, Stroke, TextureHandle, TextureOptions};
use image::RgbImage;

use crate::controller::{DisplaySurface, PointerEvent, SelectionController, SelectionState};
use crate::error::FillError;
use crate::io;
use crate::logger;
use crate::ops::geometry::Rect;
use crate::ops::onnx::{load_inferencer, probe_onnx_runtime};
use crate::pipeline::{FillJob, FillOutcome};
use crate::project::Document;
use crate::settings::AppSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StatusKind {
    Info,
    Hint,
    Error,
}

struct StatusMessage {
    text: String,
    kind: StatusKind,
}

/// What the canvas needs to redraw, filled in by the controller.
#[derive(Default)]
struct CanvasSurface {
    /// Pixels waiting to be uploaded to the GPU texture.
    upload: Option<ColorImage>,
    selection: Option<Rect>,
    busy: bool,
    /// Set when a fill changed the image since the last frame.
    modified: bool,
}

fn color_image(image: &RgbImage) -> ColorImage {
    let (w, h) = image.dimensions();
    ColorImage::from_rgb([w as usize, h as usize], image.as_raw())
}

impl DisplaySurface for CanvasSurface {
    fn present(&mut self, image: &RgbImage) {
        self.upload = Some(color_image(image));
        self.modified = true;
    }

    fn show_selection(&mut self, rect: Option<Rect>) {
        self.selection = rect;
    }

    fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }
}

pub struct InpaintApp {
    settings: AppSettings,
    controller: SelectionController,
    document: Option<Document>,
    surface: CanvasSurface,
    texture: Option<TextureHandle>,
    status: StatusMessage,
    /// Last pointer position over the canvas, in image pixels.
    last_pointer: Option<(i32, i32)>,
    /// Window title last sent to the viewport.
    title: String,

    fill_sender: mpsc::Sender<FillOutcome>,
    fill_receiver: mpsc::Receiver<FillOutcome>,
}

impl InpaintApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, initial_file: Option<PathBuf>) -> Self {
        let settings = AppSettings::load();
        // First launch: write the defaults so there is a file to edit
        if AppSettings::settings_path().is_some_and(|p| !p.exists()) {
            settings.save();
        }
        let inferencer = load_inferencer(
            &settings.onnx_runtime_path,
            &settings.model_path,
            settings.model_size(),
        )
        .shared();

        let status = match inferencer.model() {
            Ok(model) => StatusMessage {
                text: format!("Model ready: {}", model.name()),
                kind: StatusKind::Info,
            },
            Err(e) => {
                // Tell a broken model apart from a broken runtime
                let text = match probe_onnx_runtime(&settings.onnx_runtime_path) {
                    Ok(version) => format!("{} (ONNX Runtime {} is working)", e, version),
                    Err(_) => e.to_string(),
                };
                StatusMessage {
                    text,
                    kind: StatusKind::Error,
                }
            }
        };

        let (fill_sender, fill_receiver) = mpsc::channel();
        let mut app = Self {
            controller: SelectionController::new(inferencer, settings.min_region_size),
            settings,
            document: None,
            surface: CanvasSurface::default(),
            texture: None,
            status,
            last_pointer: None,
            title: String::new(),
            fill_sender,
            fill_receiver,
        };
        if let Some(path) = initial_file {
            app.open_path(path);
        }
        app
    }

    fn set_status(&mut self, kind: StatusKind, text: impl Into<String>) {
        self.status = StatusMessage {
            text: text.into(),
            kind,
        };
    }

    fn report(&mut self, err: FillError) {
        let kind = if err.is_user_recoverable() {
            StatusKind::Hint
        } else {
            StatusKind::Error
        };
        self.set_status(kind, err.to_string());
    }

    // --- File actions ---------------------------------------------

    fn open_dialog(&mut self) {
        if let Some(path) = io::pick_open_path() {
            self.open_path(path);
        }
    }

    fn open_path(&mut self, path: PathBuf) {
        let image = match io::load_image(&path) {
            Ok(img) => img,
            Err(e) => {
                log_err!("Open failed: {}", e);
                self.set_status(StatusKind::Error, format!("Could not open image: {}", e));
                return;
            }
        };
        let (w, h) = image.dimensions();
        let upload = color_image(&image);
        match self.controller.load_image(image) {
            Ok(id) => {
                let doc = Document::new(id, Some(path), w, h);
                self.set_status(StatusKind::Info, format!("Opened {} ({}x{})", doc.name, w, h));
                self.document = Some(doc);
                self.surface = CanvasSurface {
                    upload: Some(upload),
                    ..Default::default()
                };
            }
            Err(e) => self.report(e),
        }
    }

    fn save_as_dialog(&mut self) {
        if self.controller.image().is_none() {
            self.report(FillError::NoImageLoaded);
            return;
        }
        let suggested = self
            .document
            .as_ref()
            .and_then(|d| d.path.as_ref())
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "restored.png".to_string());
        let Some(path) = io::pick_save_path(&suggested) else { return };
        let Some(image) = self.controller.image() else { return };

        match io::save_image(image, &path) {
            Ok(()) => {
                log_info!("Saved {}", path.display());
                self.set_status(StatusKind::Info, format!("Saved {}", path.display()));
                if let Some(doc) = self.document.as_mut() {
                    doc.saved_as(path);
                }
            }
            Err(e) => {
                log_err!("Save to {} failed: {}", path.display(), e);
                self.set_status(StatusKind::Error, format!("Save failed: {}", e));
            }
        }
    }

    // --- Pointer → controller -------------------------------------

    fn on_pointer(&mut self, event: PointerEvent, ctx: &egui::Context) {
        let result = match event {
            PointerEvent::Release(x, y)
                if self.settings.offload_inference
                    && self.controller.state() == SelectionState::Selecting =>
            {
                self.release_to_worker(x, y, ctx)
            }
            _ => self.controller.handle(event, &mut self.surface),
        };
        if let Err(e) = result {
            self.report(e);
        }
    }

    fn release_to_worker(&mut self, x: i32, y: i32, ctx: &egui::Context) -> Result<(), FillError> {
        self.surface.show_selection(None);
        if let Some(job) = self.controller.release_deferred(x, y)? {
            self.surface.set_busy(true);
            self.set_status(StatusKind::Info, format!("Restoring {}…", job.rect));
            self.spawn_fill_job(job, ctx);
        }
        Ok(())
    }

    /// Run the model on a rayon worker; the result comes back through
    /// `fill_receiver` and is written on the UI thread.
    fn spawn_fill_job(&self, job: FillJob, ctx: &egui::Context) {
        let sender = self.fill_sender.clone();
        let inferencer = Arc::clone(self.controller.inferencer());
        let ctx = ctx.clone();
        let (document, rect) = (job.document, job.rect);

        rayon::spawn(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| job.execute(&inferencer)))
                .unwrap_or_else(|panic_info| {
                    let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.to_string()
                    } else {
                        "unknown panic payload".to_string()
                    };
                    log_err!("Fill worker panicked: {}", msg);
                    FillOutcome {
                        document,
                        rect,
                        result: Err(FillError::InferenceError(format!("worker panicked: {}", msg))),
                        elapsed: Duration::ZERO,
                    }
                });
            let _ = sender.send(outcome);
            ctx.request_repaint();
        });
    }

    fn poll_fill_results(&mut self) {
        while let Ok(outcome) = self.fill_receiver.try_recv() {
            let elapsed = outcome.elapsed;
            match self.controller.finish_fill(outcome) {
                Ok(true) => {
                    if let Some(image) = self.controller.image() {
                        self.surface.present(image);
                    }
                    self.set_status(
                        StatusKind::Info,
                        format!("Region restored in {:.1}s", elapsed.as_secs_f64()),
                    );
                }
                Ok(false) => {}
                Err(e) => self.report(e),
            }
            if self.controller.state() != SelectionState::Filling {
                self.surface.set_busy(false);
            }
        }
    }

    // --- Drawing --------------------------------------------------

    fn sync_texture(&mut self, ctx: &egui::Context) {
        if let Some(img) = self.surface.upload.take() {
            match &mut self.texture {
                Some(tex) => tex.set(img, TextureOptions::NEAREST),
                None => self.texture = Some(ctx.load_texture("document", img, TextureOptions::NEAREST)),
            }
        }
        if self.surface.modified {
            self.surface.modified = false;
            if let Some(doc) = self.document.as_mut() {
                doc.mark_dirty();
            }
        }
    }

    fn menu_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Open…").clicked() {
                        ui.close_menu();
                        self.open_dialog();
                    }
                    let can_save = self.controller.image().is_some();
                    if ui.add_enabled(can_save, egui::Button::new("Save As…")).clicked() {
                        ui.close_menu();
                        self.save_as_dialog();
                    }
                    ui.separator();
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
            });
        });
    }

    fn status_bar(&self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if self.surface.busy {
                    ui.add(egui::Spinner::new());
                }
                let color = match self.status.kind {
                    StatusKind::Info => ui.visuals().text_color(),
                    StatusKind::Hint => ui.visuals().warn_fg_color,
                    StatusKind::Error => ui.visuals().error_fg_color,
                };
                let label = ui.colored_label(color, &self.status.text);
                if self.status.kind == StatusKind::Error
                    && let Some(path) = logger::log_path()
                {
                    label.on_hover_text(format!("Details in {}", path.display()));
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if let Some(doc) = &self.document {
                        ui.label(format!("{} x {}", doc.width, doc.height));
                    }
                    if let Some((x, y)) = self.last_pointer {
                        ui.label(format!("{}, {}", x, y));
                    }
                });
            });
        });
    }

    /// Draw the image 1:1 and translate pointer input into image pixels.
    fn canvas(&mut self, ctx: &egui::Context) -> Vec<PointerEvent> {
        let mut events = Vec::new();
        egui::CentralPanel::default().show(ctx, |ui| {
            let Some(tex) = &self.texture else {
                ui.centered_and_justified(|ui| {
                    ui.label("Open an image with File → Open…, then drag over the area to restore.");
                });
                return;
            };

            egui::ScrollArea::both().show(ui, |ui| {
                let [tw, th] = tex.size();
                let (response, painter) = ui.allocate_painter(tex.size_vec2(), Sense::drag());
                let screen = response.rect;
                painter.image(
                    tex.id(),
                    screen,
                    egui::Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
                    Color32::WHITE,
                );

                let sx = tw as f32 / screen.width().max(1.0);
                let sy = th as f32 / screen.height().max(1.0);
                let to_image = |p: Pos2| {
                    (
                        ((p.x - screen.min.x) * sx).floor() as i32,
                        ((p.y - screen.min.y) * sy).floor() as i32,
                    )
                };
                let to_screen = |x: i32, y: i32| {
                    Pos2::new(screen.min.x + x as f32 / sx, screen.min.y + y as f32 / sy)
                };

                let pointer = response
                    .interact_pointer_pos()
                    .or_else(|| response.hover_pos())
                    .map(to_image);
                if pointer.is_some() {
                    self.last_pointer = pointer;
                }

                if response.drag_started() {
                    if let Some((x, y)) = pointer {
                        events.push(PointerEvent::Press(x, y));
                    }
                } else if response.dragged() {
                    if let Some((x, y)) = pointer {
                        events.push(PointerEvent::Drag(x, y));
                    }
                }
                if response.drag_released()
                    && let Some((x, y)) = pointer.or(self.last_pointer)
                {
                    events.push(PointerEvent::Release(x, y));
                }

                if let Some(sel) = self.surface.selection {
                    let r = egui::Rect::from_min_max(to_screen(sel.x1, sel.y1), to_screen(sel.x2, sel.y2));
                    painter.rect_stroke(r, 0.0, Stroke::new(2.0, Color32::RED));
                }
            });
        });
        events
    }
}

impl eframe::App for InpaintApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        {
            let title = match &self.document {
                Some(doc) => format!("InpaintFE - {}", doc.display_title()),
                None => "InpaintFE".to_string(),
            };
            if title != self.title {
                self.title = title.clone();
                ctx.send_viewport_cmd(egui::ViewportCommand::Title(title));
            }
        }

        // Files dropped onto the window
        let dropped: Option<PathBuf> =
            ctx.input(|i| i.raw.dropped_files.iter().find_map(|f| f.path.clone()));
        if let Some(path) = dropped {
            self.open_path(path);
        }

        self.poll_fill_results();
        self.sync_texture(ctx);

        self.menu_bar(ctx);
        self.status_bar(ctx);
        let events = self.canvas(ctx);
        for event in events {
            self.on_pointer(event, ctx);
        }
        // The surface may have changed during event handling
        if self.surface.upload.is_some() {
            ctx.request_repaint();
        }
    }
}
