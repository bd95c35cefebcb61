//! File operations

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::WardenError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, WardenError> {
        fs::read_to_string(&self.path).await.map_err(|e| {
            WardenError::IoError(std::io::Error::new(
                e.kind(),
                format!("reading {}: {}", self.path.display(), e),
            ))
        })
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, WardenError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Write string to file, creating parent directories as needed
    pub async fn write_string(&self, contents: &str) -> Result<(), WardenError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&self.path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }
}
