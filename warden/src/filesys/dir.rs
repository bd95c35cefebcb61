//! Scratch directories for image builds

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::fs;

use crate::errors::WardenError;

/// Root directory under which each build gets its own throwaway workspace
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create a uniquely named workspace below this directory, creating the
    /// root first if needed. The workspace is removed when the handle drops.
    pub async fn workspace(&self, prefix: &str) -> Result<TempDir, WardenError> {
        fs::create_dir_all(&self.path).await?;
        let root = self.path.clone();
        let prefix = format!("{}-", prefix);
        tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(&prefix).tempdir_in(root)
        })
        .await
        .map_err(|e| WardenError::Internal(format!("workspace task failed: {}", e)))?
        .map_err(WardenError::from)
    }

    /// Remove the directory and everything left in it. Missing is fine.
    pub async fn delete(&self) -> Result<(), WardenError> {
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
