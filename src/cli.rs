// ============================================================================
// InpaintFE CLI - headless region restoration via command-line arguments
// ============================================================================
//
// Usage examples:
//   inpaintfe --input scan.png --rect 120,40,260,180 --output fixed.png
//   inpaintfe -i photos/*.jpg --rect 0,0,64,64 --output-dir restored/
//   inpaintfe -i old.tif --rect 10,10,90,90 --model /opt/models/model-06.onnx \
//             --onnx-runtime /opt/ort/lib/libonnxruntime.so --model-size 512x512
//
// No window is opened. Each file is loaded, fed through the selection
// controller as one press/release pair and saved; everything runs on the
// current thread.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use image::RgbImage;

use crate::controller::{DisplaySurface, PointerEvent, SelectionController};
use crate::io::{SaveFormat, encode_and_write, load_image, DEFAULT_QUALITY};
use crate::ops::geometry::Rect;
use crate::ops::inference::Inferencer;
use crate::ops::onnx::load_inferencer;
use crate::ops::scale::ModelSize;
use crate::settings::AppSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// InpaintFE headless restorer.
#[derive(Parser, Debug)]
#[command(
    name = "inpaintfe",
    about = "InpaintFE headless region restoration",
    long_about = "Restore a rectangular region of one or more images with an ONNX\n\
                  inpainting model, without opening the GUI.\n\n\
                  Example:\n  \
                  inpaintfe --input scan.png --rect 120,40,260,180 --output fixed.png\n  \
                  inpaintfe -i shots/*.jpg --rect 0,0,64,64 --output-dir out/"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "scans/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Region to restore as x1,y1,x2,y2 in pixels (x2/y2 exclusive).
    /// Corners may be given in any order and are clamped to the image.
    #[arg(short, long, value_name = "X1,Y1,X2,Y2", value_parser = parse_rect, allow_hyphen_values = true)]
    pub rect: Rect,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Inpainting model (.onnx). Overrides the settings file.
    #[arg(long, value_name = "MODEL.onnx")]
    pub model: Option<String>,

    /// ONNX Runtime shared library. Overrides the settings file.
    #[arg(long, value_name = "LIBRARY")]
    pub onnx_runtime: Option<String>,

    /// Model input size (WxH or a single side), used when the model's shape is dynamic.
    #[arg(long, value_name = "WxH", value_parser = parse_model_size)]
    pub model_size: Option<ModelSize>,

    /// Smallest usable selection side in pixels.
    #[arg(long, value_name = "PX")]
    pub min_region: Option<i32>,

    /// Print per-file timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Returns `true` when any CLI-mode flag is present in the real process arguments.
    /// Used by `main()` to route before creating an eframe window.
    pub fn is_cli_mode() -> bool {
        std::env::args().any(|a| a == "--input" || a == "-i")
    }

    /// Apply command-line overrides on top of the saved settings.
    pub fn apply_to(&self, settings: &mut AppSettings) {
        if let Some(model) = &self.model {
            settings.model_path = absolute_arg(model);
        }
        if let Some(runtime) = &self.onnx_runtime {
            settings.onnx_runtime_path = absolute_arg(runtime);
        }
        if let Some(size) = self.model_size {
            settings.model_width = size.width;
            settings.model_height = size.height;
        }
        if let Some(min) = self.min_region {
            settings.min_region_size = min.max(1);
        }
    }
}

/// Resolve a path given on the command line against the working directory.
fn absolute_arg(path: &str) -> String {
    std::path::absolute(path)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.to_string())
}

/// Parse `x1,y1,x2,y2`.
pub fn parse_rect(s: &str) -> Result<Rect, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(format!("expected x1,y1,x2,y2 but got '{}'", s));
    }
    let mut v = [0i32; 4];
    for (slot, part) in v.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| format!("'{}' is not an integer coordinate", part))?;
    }
    Ok(Rect::new(v[0], v[1], v[2], v[3]))
}

fn parse_model_size(s: &str) -> Result<ModelSize, String> {
    ModelSize::parse(s).ok_or_else(|| format!("expected WxH (e.g. 512x512) but got '{}'", s))
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let mut settings = AppSettings::load();
    args.apply_to(&mut settings);

    // Load once; a missing model fails every file the same way, so stop here.
    let inferencer = load_inferencer(
        &settings.onnx_runtime_path,
        &settings.model_path,
        settings.model_size(),
    )
    .shared();
    if let Err(e) = inferencer.model() {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!(
            "error: could not create output directory '{}': {}",
            dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    if run_batch(&inputs, &args, inferencer, settings.min_region_size) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Process every input. Returns `true` when all of them succeeded.
fn run_batch(
    inputs: &[PathBuf],
    args: &CliArgs,
    inferencer: Arc<Inferencer>,
    min_region: i32,
) -> bool {
    let mut controller = SelectionController::new(inferencer, min_region);
    let total = inputs.len();
    let multi = total > 1;
    let mut all_ok = true;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let Some(output_path) =
            build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref())
        else {
            eprintln!(
                "  error: cannot determine output path for '{}'.",
                input_path.display()
            );
            all_ok = false;
            continue;
        };

        match run_one(&mut controller, input_path, &output_path, args.rect) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                all_ok = false;
            }
        }
    }
    all_ok
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

/// Display surface for headless runs: nothing is drawn.
#[derive(Default)]
struct HeadlessSurface {
    presented: bool,
}

impl DisplaySurface for HeadlessSurface {
    fn present(&mut self, _image: &RgbImage) {
        self.presented = true;
    }
    fn show_selection(&mut self, _rect: Option<Rect>) {}
    fn set_busy(&mut self, _busy: bool) {}
}

fn run_one(
    controller: &mut SelectionController,
    input: &Path,
    output: &Path,
    rect: Rect,
) -> Result<(), String> {
    if overwrites_input(input, output) {
        return Err(format!(
            "output '{}' would overwrite the input file",
            output.display()
        ));
    }

    // -- Step 1: Load ----------------------------------------------------
    let image = load_image(input).map_err(|e| format!("load failed: {}", e))?;
    controller.load_image(image).map_err(|e| e.to_string())?;

    // -- Step 2: Select and fill -----------------------------------------
    let mut surface = HeadlessSurface::default();
    controller
        .handle(PointerEvent::Press(rect.x1, rect.y1), &mut surface)
        .and_then(|()| controller.handle(PointerEvent::Release(rect.x2, rect.y2), &mut surface))
        .map_err(|e| e.to_string())?;
    if !surface.presented {
        return Err("region was not filled".to_string());
    }

    // -- Step 3: Save ----------------------------------------------------
    let restored = controller
        .take_image()
        .ok_or_else(|| "image lost during fill".to_string())?;
    encode_and_write(&restored, output, SaveFormat::from_path(output), DEFAULT_QUALITY)
        .map_err(|e| format!("save failed: {}", e))
}

// ============================================================================
// Helpers
// ============================================================================

/// `true` when `output` names the same existing file as `input`.
fn overwrites_input(input: &Path, output: &Path) -> bool {
    matches!(
        (input.canonicalize(), output.canonicalize()),
        (Ok(a), Ok(b)) if a == b
    )
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);
        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    matched = true;
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, keeps the input's file name)
/// 3. Fallback: next to the input as `<stem>_restored.<ext>`
///
/// Inputs whose extension cannot be written are saved as PNG.
fn build_output_path(input: &Path, output: Option<&Path>, output_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let stem = input.file_stem()?.to_string_lossy().into_owned();
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| SaveFormat::from_extension(e).is_some())
        .map(str::to_string)
        .unwrap_or_else(|| SaveFormat::Png.extension().to_string());

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.{}", stem, ext)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    Some(parent.join(format!("{}_restored.{}", stem, ext)))
}
