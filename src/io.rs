// ============================================================================
// Image file I/O - decode to RGB8, encode by extension, native file dialogs
// ============================================================================

use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tga::TgaEncoder;
use image::{DynamicImage, ImageEncoder, ImageError, ImageOutputFormat, RgbImage};
use rfd::FileDialog;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Extensions offered in the Open dialog.
pub const OPEN_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "tga", "tiff", "tif"];

/// Default JPEG quality.
pub const DEFAULT_QUALITY: u8 = 90;

/// Output formats. Restored images are always 8-bit RGB.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SaveFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
    Bmp,
    Tga,
    Tiff,
}

impl SaveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Webp => "webp",
            SaveFormat::Bmp => "bmp",
            SaveFormat::Tga => "tga",
            SaveFormat::Tiff => "tiff",
        }
    }

    /// Format for a file extension; unknown extensions give `None`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(SaveFormat::Png),
            "jpg" | "jpeg" => Some(SaveFormat::Jpeg),
            "webp" => Some(SaveFormat::Webp),
            "bmp" => Some(SaveFormat::Bmp),
            "tga" => Some(SaveFormat::Tga),
            "tiff" | "tif" => Some(SaveFormat::Tiff),
            _ => None,
        }
    }

    /// Infer from a path's extension, defaulting to PNG.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .unwrap_or_default()
    }
}

/// Decode any format the `image` crate understands into 8-bit RGB.
/// Alpha is dropped.
pub fn load_image(path: &Path) -> Result<RgbImage, String> {
    let img = image::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(img.to_rgb8())
}

/// Encode `image` into `path`. A file left half-written by a failed encode
/// is removed.
pub fn encode_and_write(
    image: &RgbImage,
    path: &Path,
    format: SaveFormat,
    quality: u8,
) -> Result<(), ImageError> {
    let file = File::create(path)?;
    let result = write_encoded(BufWriter::new(file), image, path, format, quality);
    if result.is_err() {
        let _ = std::fs::remove_file(path);
    }
    result
}

fn write_encoded(
    mut writer: BufWriter<File>,
    image: &RgbImage,
    path: &Path,
    format: SaveFormat,
    quality: u8,
) -> Result<(), ImageError> {
    let (w, h) = image.dimensions();

    match format {
        SaveFormat::Png => {
            PngEncoder::new(&mut writer).write_image(image.as_raw(), w, h, image::ColorType::Rgb8)?;
        }
        SaveFormat::Jpeg => {
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
            encoder.encode(image.as_raw(), w, h, image::ColorType::Rgb8)?;
        }
        SaveFormat::Webp => {
            drop(writer);
            return DynamicImage::ImageRgb8(image.clone()).save(path);
        }
        SaveFormat::Bmp => {
            let mut encoder = BmpEncoder::new(&mut writer);
            encoder.encode(image.as_raw(), w, h, image::ColorType::Rgb8)?;
        }
        SaveFormat::Tga => {
            TgaEncoder::new(&mut writer).encode(image.as_raw(), w, h, image::ColorType::Rgb8)?;
        }
        SaveFormat::Tiff => {
            DynamicImage::ImageRgb8(image.clone()).write_to(&mut writer, ImageOutputFormat::Tiff)?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Save with the format implied by the path's extension.
pub fn save_image(image: &RgbImage, path: &Path) -> Result<(), ImageError> {
    encode_and_write(image, path, SaveFormat::from_path(path), DEFAULT_QUALITY)
}

/// Show the native Open dialog.
pub fn pick_open_path() -> Option<PathBuf> {
    FileDialog::new()
        .add_filter("Images", OPEN_EXTENSIONS)
        .add_filter("All Files", &["*"])
        .pick_file()
}

/// Show the native Save As dialog, suggesting `suggested` as file name.
pub fn pick_save_path(suggested: &str) -> Option<PathBuf> {
    FileDialog::new()
        .add_filter("PNG", &["png"])
        .add_filter("JPEG", &["jpg", "jpeg"])
        .add_filter("WEBP", &["webp"])
        .add_filter("BMP", &["bmp"])
        .add_filter("TGA", &["tga"])
        .add_filter("TIFF", &["tiff", "tif"])
        .set_file_name(suggested)
        .save_file()
}
