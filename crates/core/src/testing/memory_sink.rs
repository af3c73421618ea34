//! In-memory download sink.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::orchestrator::DownloadSink;

/// Collects written files in memory. Clones share the contents.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    files: Arc<RwLock<Vec<(String, Bytes)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files written so far, in write order.
    pub async fn files(&self) -> Vec<(String, Bytes)> {
        self.files.read().await.clone()
    }

    pub async fn names(&self) -> Vec<String> {
        self.files
            .read()
            .await
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub async fn get(&self, name: &str) -> Option<Bytes> {
        self.files
            .read()
            .await
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.clone())
    }
}

#[async_trait]
impl DownloadSink for MemorySink {
    async fn write(&self, name: &str, data: Bytes) -> std::io::Result<()> {
        self.files.write().await.push((name.to_string(), data));
        Ok(())
    }
}
