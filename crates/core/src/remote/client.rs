//! Upload, WebSocket and download driver for remote jobs.

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use reqwest::multipart::{Form, Part};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::converter::{ConversionInput, ConvertedFile, ConverterError, ProgressReporter};
use crate::instance::{content_hash, Blocklist, InstanceSelector};
use crate::metrics;

use super::config::RemoteConfig;
use super::progress::{Phase, PhaseTracker};
use super::protocol::{
    download_url, unwrap_envelope, websocket_url, ClientMessage, KeepRequest, ServerMessage,
    UploadResponse,
};

/// Size of the body chunks the upload is streamed in.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn network(e: impl std::fmt::Display) -> ConverterError {
    ConverterError::Network(e.to_string())
}

struct ActiveGuard<'a> {
    active: &'a Mutex<HashMap<String, CancellationToken>>,
    job_id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.job_id);
        }
    }
}

/// Runs conversions on the remote service.
///
/// One conversion is: blocklist check, multipart upload, a WebSocket session
/// that starts the job and follows it to completion, then the download.
pub struct RemoteJobClient {
    http: reqwest::Client,
    selector: Arc<InstanceSelector>,
    blocklist: Arc<Blocklist>,
    config: RemoteConfig,
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl RemoteJobClient {
    pub fn new(selector: Arc<InstanceSelector>, blocklist: Arc<Blocklist>, config: RemoteConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .unwrap_or_default();
        Self {
            http,
            selector,
            blocklist,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn selector(&self) -> &InstanceSelector {
        &self.selector
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.blocklist
    }

    /// Number of conversions currently registered.
    pub fn active_count(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// Version string reported by the instance at `base_url`.
    pub async fn version(&self, base_url: &str) -> Result<String, ConverterError> {
        let body = self
            .http
            .get(format!("{}/api/version", base_url))
            .send()
            .await
            .map_err(network)?
            .text()
            .await
            .map_err(network)?;
        unwrap_envelope(&body)
    }

    /// Asks the instance to retain a finished job's files. Fire-and-forget.
    pub fn keep(&self, base_url: &str, job_id: &str, auth: &str) {
        let request = self
            .http
            .post(format!("{}/api/keep", base_url))
            .json(&KeepRequest {
                id: job_id.to_string(),
                token: auth.to_string(),
            });
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = request.send().await {
                debug!(job_id = %job_id, "Keep request failed: {}", e);
            }
        });
    }

    /// Converts `input` on the remote service.
    pub async fn convert(
        &self,
        input: &ConversionInput,
        to: &str,
        progress: ProgressReporter,
    ) -> Result<ConvertedFile, ConverterError> {
        let hash = content_hash(&input.data);
        if self.blocklist.is_blocked(&hash) {
            metrics::RATE_LIMIT_REJECTIONS.inc();
            info!(job_id = %input.job_id, "Conversion blocked for {}", input.name);
            return Err(ConverterError::RateLimited {
                name: input.name.clone(),
                hash,
            });
        }

        let token = input.cancel.child_token();
        if let Ok(mut active) = self.active.lock() {
            active.insert(input.job_id.clone(), token.clone());
        }
        let _guard = ActiveGuard {
            active: &self.active,
            job_id: input.job_id.clone(),
        };

        let base_url = self.selector.url().await;
        let tracker = PhaseTracker::new(progress);

        let upload = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ConverterError::Cancelled),
            upload = self.upload(&base_url, input, &tracker) => upload?,
        };
        info!(
            job_id = %input.job_id,
            instance = %base_url,
            remote_job = %upload.id,
            "Uploaded {}",
            input.name
        );

        let socket = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ConverterError::Cancelled),
            socket = self.connect(&base_url) => socket?,
        };
        debug!(job_id = %input.job_id, "Opened WebSocket connection");

        let finished = self
            .follow_job(socket, input, to, &upload, &hash, &tracker, &token)
            .await?;

        let url = download_url(&base_url, &finished, &upload.auth);
        debug!(job_id = %input.job_id, "Downloading from {}", url);
        let data = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ConverterError::Cancelled),
            data = self.download(&url, &tracker) => data?,
        };
        tracker.fraction(Phase::Download, 1.0);

        Ok(ConvertedFile::new(input.output_name(to), to, data))
    }

    /// Cancels the conversion registered under `job_id`.
    ///
    /// An open session sends `cancelJob` before closing.
    pub fn cancel(&self, job_id: &str) {
        let token = self
            .active
            .lock()
            .ok()
            .and_then(|mut active| active.remove(job_id));
        match token {
            Some(token) => {
                info!(job_id = %job_id, "Cancelling remote conversion");
                token.cancel();
            }
            None => warn!(job_id = %job_id, "No active remote conversion to cancel"),
        }
    }

    async fn upload(
        &self,
        base_url: &str,
        input: &ConversionInput,
        tracker: &PhaseTracker,
    ) -> Result<UploadResponse, ConverterError> {
        let data = input.data.clone();
        let total = data.len() as u64;
        let chunks: Vec<Bytes> = (0..data.len())
            .step_by(UPLOAD_CHUNK_SIZE)
            .map(|start| data.slice(start..(start + UPLOAD_CHUNK_SIZE).min(data.len())))
            .collect();

        let tracker = tracker.clone();
        let mut sent = 0u64;
        let body = futures::stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            tracker.ratio(Phase::Upload, sent, total);
            Ok::<_, std::io::Error>(chunk)
        });

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(body), total)
            .file_name(input.name.clone())
            .mime_str("application/octet-stream")
            .map_err(network)?;
        let form = Form::new().part("file", part);

        let body = self
            .http
            .post(format!("{}/api/upload", base_url))
            .multipart(form)
            .send()
            .await
            .map_err(network)?
            .text()
            .await
            .map_err(network)?;
        unwrap_envelope(&body)
    }

    async fn connect(&self, base_url: &str) -> Result<Socket, ConverterError> {
        let url = websocket_url(base_url);
        let timeout = self.config.request_timeout();
        let (socket, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str()))
            .await
            .map_err(|_| ConverterError::timeout("websocket connection", timeout))?
            .map_err(network)?;
        Ok(socket)
    }

    /// Starts the job and follows server messages until it ends.
    ///
    /// Returns the job id to download on `jobFinished`.
    #[allow(clippy::too_many_arguments)]
    async fn follow_job(
        &self,
        mut socket: Socket,
        input: &ConversionInput,
        to: &str,
        upload: &UploadResponse,
        hash: &str,
        tracker: &PhaseTracker,
        token: &CancellationToken,
    ) -> Result<String, ConverterError> {
        let start = ClientMessage::StartJob {
            token: upload.auth.clone(),
            job_id: upload.id.clone(),
            to: to.trim_start_matches('.').to_string(),
            speed: self.config.speed,
            keep_metadata: input
                .options
                .keep_metadata
                .unwrap_or(self.config.keep_metadata),
        };
        send(&mut socket, &start).await?;
        debug!(job_id = %input.job_id, "Sent startJob message");

        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => {
                    let cancel = ClientMessage::CancelJob {
                        job_id: upload.id.clone(),
                        token: upload.auth.clone(),
                    };
                    match send(&mut socket, &cancel).await {
                        Ok(()) => debug!(job_id = %input.job_id, "Sent cancelJob message"),
                        Err(e) => debug!(job_id = %input.job_id, "Could not send cancelJob: {}", e),
                    }
                    let _ = socket.close(None).await;
                    return Err(ConverterError::Cancelled);
                }
                frame = socket.next() => frame,
            };

            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(ConverterError::Network(
                        "Connection closed before the job finished".to_string(),
                    ));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(network(e)),
            };

            let Some(message) = ServerMessage::parse(text.as_str()) else {
                debug!(job_id = %input.job_id, "Ignoring unrecognized message: {}", text.as_str());
                continue;
            };
            debug!(job_id = %input.job_id, "Received {} message", message.label());

            match message {
                ServerMessage::ProgressUpdate(data) => {
                    if let Some(frame) = data.frame_count() {
                        tracker.ratio(Phase::Convert, frame, upload.total_frames);
                    }
                }
                ServerMessage::JobFinished { job_id } => {
                    info!(job_id = %input.job_id, "Remote job finished");
                    let _ = socket.close(None).await;
                    return Ok(job_id);
                }
                ServerMessage::JobCancelled { .. } => {
                    info!(job_id = %input.job_id, "Remote job cancelled");
                    let _ = socket.close(None).await;
                    return Err(ConverterError::Cancelled);
                }
                ServerMessage::Error { message } => {
                    warn!(job_id = %input.job_id, remote_job = %upload.id, "Remote job failed: {}", message);
                    self.blocklist.strike(hash);
                    metrics::RATE_LIMIT_STRIKES.inc();
                    let _ = socket.close(None).await;
                    return Err(ConverterError::RemoteJobFailed {
                        message,
                        job_id: Some(upload.id.clone()),
                        auth: Some(upload.auth.clone()),
                        from: input.from.clone(),
                        to: to.to_string(),
                    });
                }
            }
        }
    }

    async fn download(&self, url: &str, tracker: &PhaseTracker) -> Result<Bytes, ConverterError> {
        let response = self.http.get(url).send().await.map_err(network)?;
        if !response.status().is_success() {
            return Err(ConverterError::Network(format!(
                "Download failed with status {}",
                response.status()
            )));
        }

        let total = response.content_length().unwrap_or(0);
        let mut received = 0u64;
        let mut buffer = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(network)?;
            received += chunk.len() as u64;
            buffer.extend_from_slice(&chunk);
            tracker.ratio(Phase::Download, received, total);
        }
        Ok(buffer.freeze())
    }
}

async fn send(socket: &mut Socket, message: &ClientMessage) -> Result<(), ConverterError> {
    let json = serde_json::to_string(message).map_err(network)?;
    socket.send(Message::text(json)).await.map_err(network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{default_endpoints, FixedLocation, InstanceMode};
    use crate::testing::MockProbe;

    fn client() -> RemoteJobClient {
        let selector = InstanceSelector::new(
            default_endpoints(),
            "http://127.0.0.1:9",
            Arc::new(FixedLocation(Default::default())),
            Arc::new(MockProbe::reachable(&[])),
        )
        .with_mode(InstanceMode::Custom);
        RemoteJobClient::new(
            Arc::new(selector),
            Arc::new(Blocklist::new()),
            RemoteConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_blocked_hash_skips_network() {
        let client = client();
        let input = ConversionInput::new("j1", "clip.mkv", Bytes::from_static(b"frames"));
        let hash = content_hash(&input.data);
        for _ in 0..3 {
            client.blocklist().strike(&hash);
        }

        let err = client
            .convert(&input, ".mp4", ProgressReporter::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, ConverterError::RateLimited { ref name, .. } if name == "clip.mkv"));
        assert_eq!(client.active_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_instance_is_network_error() {
        let client = client();
        let input = ConversionInput::new("j1", "clip.mkv", Bytes::from_static(b"frames"));
        let err = client
            .convert(&input, ".mp4", ProgressReporter::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, ConverterError::Network(_)));
        assert!(!err.is_strike());
        assert_eq!(client.blocklist().tracked(), 0);
        assert_eq!(client.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_without_active_conversion_is_noop() {
        let client = client();
        client.cancel("missing");
        assert_eq!(client.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_input_stops_before_upload() {
        let client = client();
        let token = CancellationToken::new();
        token.cancel();
        let input = ConversionInput::new("j1", "clip.mkv", Bytes::from_static(b"frames"))
            .with_cancel(token);
        let err = client
            .convert(&input, ".mp4", ProgressReporter::noop())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(client.active_count(), 0);
    }
}
