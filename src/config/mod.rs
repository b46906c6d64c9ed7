//! Configuration module
//!
//! Handles application settings and their on-disk location

mod settings;

pub use settings::{AppConfig, PollingConfig};

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "meterpoll", "Meterpoll")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}

/// Initialize application directories
pub fn init_directories() -> std::io::Result<()> {
    for dir in [config_dir(), data_dir(), log_dir()].into_iter().flatten() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(())
}

/// Where a `--log-file` value is written
///
/// A bare file name lands in the log directory; anything with a directory part
/// is used as given.
pub fn log_file_path(path: &Path) -> PathBuf {
    let bare = path.parent().map_or(true, |p| p.as_os_str().is_empty());
    match (bare, log_dir()) {
        (true, Some(dir)) => dir.join(path),
        _ => path.to_path_buf(),
    }
}
