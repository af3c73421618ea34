//! Download targets for converted files.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Receives finished downloads.
#[async_trait]
pub trait DownloadSink: Send + Sync {
    async fn write(&self, name: &str, data: Bytes) -> std::io::Result<()>;
}

/// Writes downloads into a directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DownloadSink for DirectorySink {
    async fn write(&self, name: &str, data: Bytes) -> std::io::Result<()> {
        // never escape the target directory
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, name.to_string()))?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name);
        debug!("Writing {} ({} bytes)", path.display(), data.len());
        tokio::fs::write(path, &data).await
    }
}
