use std::path::{Path, PathBuf};

use crate::ops::scale::ModelSize;

/// Application settings that persist across sessions
#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    // ONNX Runtime
    /// Path to onnxruntime.dll / libonnxruntime.so
    pub onnx_runtime_path: String,
    /// Path to the inpainting .onnx model file
    pub model_path: String,
    /// Model input size, used when the model does not declare one
    pub model_width: u32,
    pub model_height: u32,

    // Selection
    /// Smallest usable selection side in pixels (>= 1)
    pub min_region_size: i32,

    // Behaviour
    /// Run fills on a worker thread so the window stays responsive.
    pub offload_inference: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        let size = ModelSize::default();
        Self {
            onnx_runtime_path: String::new(),
            model_path: String::new(),
            model_width: size.width,
            model_height: size.height,
            min_region_size: 1,
            offload_inference: true,
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/inpaintfe/inpaintfe_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\InpaintFE\inpaintfe_settings.cfg
    /// On macOS:   ~/Library/Application Support/InpaintFE/inpaintfe_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("inpaintfe");
            return Some(config_dir.join("inpaintfe_settings.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(
                PathBuf::from(appdata)
                    .join("InpaintFE")
                    .join("inpaintfe_settings.cfg"),
            );
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("InpaintFE")
                    .join("inpaintfe_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("inpaintfe_settings.cfg")))
        }
    }

    pub fn model_size(&self) -> ModelSize {
        ModelSize::new(self.model_width, self.model_height)
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "onnx_runtime_path={}\n\
             model_path={}\n\
             model_width={}\n\
             model_height={}\n\
             min_region_size={}\n\
             offload_inference={}\n",
            self.onnx_runtime_path,
            self.model_path,
            self.model_width,
            self.model_height,
            self.min_region_size,
            self.offload_inference,
        )
    }

    /// Parse `key=value` lines. Unknown keys and unparsable values fall back
    /// to the defaults.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "onnx_runtime_path" => s.onnx_runtime_path = val.to_string(),
                "model_path" => s.model_path = val.to_string(),
                "model_width" => {
                    s.model_width = val.parse().ok().filter(|&v| v > 0).unwrap_or(s.model_width);
                }
                "model_height" => {
                    s.model_height = val.parse().ok().filter(|&v| v > 0).unwrap_or(s.model_height);
                }
                "min_region_size" => {
                    s.min_region_size = val.parse::<i32>().unwrap_or(1).max(1);
                }
                "offload_inference" => s.offload_inference = val != "false",
                _ => {}
            }
        }
        s
    }

    /// Save settings to disk
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(e) = self.save_to(&path) {
            log_warn!("Could not save settings to {}: {}", path.display(), e);
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }
}
