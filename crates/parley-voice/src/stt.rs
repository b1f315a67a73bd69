use crate::config::ServiceConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum audio input size for transcription (10 MiB).
pub const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionRequest {
    pub session_id: String,
    pub audio: Vec<u8>,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResponse {
    pub transcript: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[async_trait]
pub trait TranscriptionService: Send + Sync {
    async fn transcribe(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionResponse, VoiceError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptionBody<'a> {
    session_id: &'a str,
    audio: String,
    language: &'a str,
}

/// Transcription over HTTP. Audio is sent base64 encoded in a JSON body.
#[derive(Debug, Clone)]
pub struct HttpTranscriptionService {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTranscriptionService {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self, VoiceError> {
        Self::new(
            config.transcription_url.clone(),
            config.api_key().map(str::to_string),
            config.request_timeout(),
        )
    }
}

#[async_trait]
impl TranscriptionService for HttpTranscriptionService {
    async fn transcribe(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionResponse, VoiceError> {
        if request.audio.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::Transcription(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                request.audio.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        let body = TranscriptionBody {
            session_id: &request.session_id,
            audio: base64::engine::general_purpose::STANDARD.encode(&request.audio),
            language: &request.language,
        };

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| VoiceError::Transcription(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Transcription(format!(
                "service returned {}: {}",
                status, detail
            )));
        }

        response
            .json::<TranscriptionResponse>()
            .await
            .map_err(|e| VoiceError::Transcription(format!("invalid response body: {}", e)))
    }
}
