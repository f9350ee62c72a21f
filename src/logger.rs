//! Session logger: every fill, model load and failure goes to one file in the
//! OS data directory.
//!
//! The file is truncated at each GUI launch, so it only holds the most recent
//! session. Before [`init`] is called every macro is a no-op; the CLI and the
//! test suite never touch the filesystem through here.
//!
//! Log location:
//!   Windows:  `%APPDATA%\InpaintFE\inpaintfe.log`
//!   Linux:    `~/.local/share/InpaintFE/inpaintfe.log`
//!   macOS:    `~/Library/Application Support/InpaintFE/inpaintfe.log`

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Path of the current session log, if logging is active.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Append one raw line. I/O errors are swallowed.
pub fn write_line(line: &str) {
    if let Some(mutex) = LOG_FILE.get()
        && let Ok(mut file) = mutex.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

/// Append a `[HH:MM:SS] [LEVEL] msg` line.
pub fn write(level: &str, msg: &str) {
    if LOG_FILE.get().is_none() {
        return;
    }
    write_line(&format!("[{}] [{}] {}", timestamp(), level, msg));
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write("INFO", &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write("WARN", &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write("ERROR", &format!($($arg)*))
    };
}

/// Start logging to the default per-user location.
pub fn init() {
    init_at(&default_log_path());
}

/// Start logging to `path`, truncating it, and mirror panics into it.
/// Only the first successful call has any effect.
pub fn init_at(path: &Path) {
    if LOG_FILE.get().is_some() {
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
    {
        Ok(f) => f,
        Err(e) => {
            // Not fatal: the app runs without a log
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            return;
        }
    };
    if LOG_FILE.set(Mutex::new(file)).is_err() {
        return;
    }
    let _ = LOG_PATH.set(path.to_path_buf());

    write_line(&format!(
        "=== InpaintFE {} session started {} ===",
        env!("CARGO_PKG_VERSION"),
        human_timestamp()
    ));
    write_line(&format!("Log file: {}", path.display()));
    write_line("");

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format!("[{}] [PANIC] {}", timestamp(), info));
        prev(info);
    }));
}

pub fn default_log_path() -> PathBuf {
    data_dir().join("InpaintFE").join("inpaintfe.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

/// `HH:MM:SS` (UTC) within the current day.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => {
            let secs = d.as_secs();
            format!(
                "{:02}:{:02}:{:02}",
                (secs % 86400) / 3600,
                (secs % 3600) / 60,
                secs % 60
            )
        }
        Err(_) => "??:??:??".to_string(),
    }
}

fn human_timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format!("(unix {})", d.as_secs()),
        Err(_) => "(unknown time)".to_string(),
    }
}
