//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout for warden
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Working directory for image builds (clones and build contexts)
    pub fn builds_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("builds"))
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/etc/warden");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".warden");

        Self::new(base_dir)
    }
}
