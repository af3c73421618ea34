//! Backend that delegates video conversion to the remote service.

use async_trait::async_trait;
use tracing::debug;

use crate::converter::{
    catalog, Backend, ConversionInput, ConvertedFile, ConverterError, FormatDescriptor,
    ProgressReporter, Readiness,
};

use super::client::RemoteJobClient;

/// Registry name of the remote backend.
pub const VERTD_BACKEND: &str = "vertd";

fn vertd_formats() -> Vec<FormatDescriptor> {
    catalog(&[
        (".mkv", true, true, true),
        (".mp4", true, true, true),
        (".webm", true, true, true),
        (".avi", true, true, true),
        (".wmv", true, true, true),
        (".mov", true, true, true),
        (".gif", true, true, true),
        (".mts", true, true, true),
        (".ts", true, true, true),
        (".m2ts", true, true, true),
        (".mpg", true, true, true),
        (".mpeg", true, true, true),
        (".flv", true, true, true),
        (".f4v", true, true, true),
        (".vob", true, true, true),
        (".m4v", true, true, true),
        (".3gp", true, true, true),
        (".3g2", true, true, true),
        (".mxf", true, true, true),
        (".ogv", true, true, true),
        (".rm", true, false, true),
        (".rmvb", true, false, true),
        (".h264", true, true, true),
        (".divx", true, true, true),
        (".swf", true, true, true),
        (".amv", true, true, true),
        (".asf", true, true, true),
        (".nut", true, true, true),
    ])
}

/// Video conversion on a remote instance. Ready as soon as it is built.
pub struct VertdBackend {
    formats: Vec<FormatDescriptor>,
    readiness: Readiness,
    client: RemoteJobClient,
}

impl VertdBackend {
    pub fn new(client: RemoteJobClient) -> Self {
        Self {
            formats: vertd_formats(),
            readiness: Readiness::ready(VERTD_BACKEND),
            client,
        }
    }

    pub fn client(&self) -> &RemoteJobClient {
        &self.client
    }
}

#[async_trait]
impl Backend for VertdBackend {
    fn name(&self) -> &str {
        VERTD_BACKEND
    }

    fn supported_formats(&self) -> &[FormatDescriptor] {
        &self.formats
    }

    fn reports_progress(&self) -> bool {
        true
    }

    fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    async fn convert(
        &self,
        input: ConversionInput,
        to: &str,
        progress: ProgressReporter,
    ) -> Result<ConvertedFile, ConverterError> {
        self.client.convert(&input, to, progress).await
    }

    async fn cancel(&self, job_id: &str) {
        self.client.cancel(job_id);
    }

    /// Reachable when an instance URL resolves and answers the version probe.
    async fn health_check(&self) -> bool {
        let base_url = self.client.selector().url().await;
        if base_url.is_empty() {
            return false;
        }
        match self.client.version(&base_url).await {
            Ok(version) => {
                debug!(instance = %base_url, "Instance version {}", version);
                true
            }
            Err(e) => {
                debug!(instance = %base_url, "Version check failed: {}", e);
                false
            }
        }
    }
}
