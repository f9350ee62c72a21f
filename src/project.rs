use std::path::{Path, PathBuf};
use uuid::Uuid;

/// The image currently open in the editor.
///
/// Pixels live in the selection controller; this only tracks identity and
/// file bookkeeping.
#[derive(Clone, Debug)]
pub struct Document {
    pub id: Uuid,
    /// `None` until the document has been saved or when opened from memory.
    pub path: Option<PathBuf>,
    pub is_dirty: bool,

    /// Display name (derived from path or "Untitled")
    pub name: String,

    pub width: u32,
    pub height: u32,
}

impl Document {
    pub fn new(id: Uuid, path: Option<PathBuf>, width: u32, height: u32) -> Self {
        let name = path
            .as_deref()
            .map(display_name)
            .unwrap_or_else(|| "Untitled".to_string());

        Self {
            id,
            path,
            is_dirty: false,
            name,
            width,
            height,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Record a successful Save As.
    pub fn saved_as(&mut self, path: PathBuf) {
        self.name = display_name(&path);
        self.path = Some(path);
        self.is_dirty = false;
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}
