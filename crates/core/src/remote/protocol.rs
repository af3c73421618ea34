//! Wire types for the remote conversion service.
//!
//! HTTP responses and WebSocket frames share the `{type, data}` envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::converter::ConverterError;

/// Encoder preset requested from the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversionSpeed {
    VerySlow,
    Slower,
    #[default]
    Slow,
    Medium,
    Fast,
    UltraFast,
}

/// Body of a successful `POST /api/upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub id: String,
    pub auth: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub total_frames: u64,
}

/// Body of `POST /api/keep`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepRequest {
    pub id: String,
    pub token: String,
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    StartJob {
        token: String,
        job_id: String,
        /// Target format without the leading dot.
        to: String,
        speed: ConversionSpeed,
        keep_metadata: bool,
    },
    #[serde(rename_all = "camelCase")]
    CancelJob { job_id: String, token: String },
}

/// Progress payload carried by `progressUpdate`: `{type: "fps" | "frame", data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressData {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl ProgressData {
    pub fn frame(frame: u64) -> Self {
        Self {
            kind: "frame".to_string(),
            data: Value::from(frame),
        }
    }

    /// Frame count, when this is a frame update.
    pub fn frame_count(&self) -> Option<u64> {
        if self.kind != "frame" {
            return None;
        }
        self.data
            .as_u64()
            .or_else(|| self.data.as_f64().map(|f| f.max(0.0) as u64))
    }
}

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    ProgressUpdate(ProgressData),
    #[serde(rename_all = "camelCase")]
    JobFinished { job_id: String },
    #[serde(rename_all = "camelCase")]
    JobCancelled { job_id: String },
    Error { message: String },
}

impl ServerMessage {
    /// Parses a text frame. Unknown message types yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ProgressUpdate(_) => "progressUpdate",
            Self::JobFinished { .. } => "jobFinished",
            Self::JobCancelled { .. } => "jobCancelled",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Unwraps an HTTP `{type, data}` body into its payload.
///
/// `type == "error"` becomes a [`ConverterError::Network`] carrying `data`.
pub fn unwrap_envelope<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, ConverterError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|_| ConverterError::Network(body.trim().to_string()))?;

    if envelope.kind == "error" {
        let message = match envelope.data {
            Value::String(s) => s,
            other => other.to_string(),
        };
        return Err(ConverterError::Network(message));
    }

    serde_json::from_value(envelope.data)
        .map_err(|e| ConverterError::Network(format!("Unexpected response: {}", e)))
}

/// Derives the WebSocket endpoint from an HTTP base URL.
pub fn websocket_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}/api/ws", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}/api/ws", rest)
    } else {
        format!("ws://{}/api/ws", base)
    }
}

/// URL of the converted output.
pub fn download_url(base_url: &str, job_id: &str, auth: &str) -> String {
    format!(
        "{}/api/download/{}/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(job_id),
        urlencoding::encode(auth)
    )
}
