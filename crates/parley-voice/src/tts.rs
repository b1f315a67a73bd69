use crate::config::ServiceConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use parley_types::voice::SynthesisModel;
use serde::Serialize;
use std::time::Duration;

/// Maximum text input size for synthesis (64 KiB).
pub const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Response header the synthesis service sets to `HIT` when it answered from
/// its own cache.
const SERVICE_CACHE_HEADER: &str = "x-cache";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: String,
    #[serde(serialize_with = "serialize_model")]
    pub model: SynthesisModel,
}

fn serialize_model<S: serde::Serializer>(
    model: &SynthesisModel,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(model.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub service_cache_hit: bool,
}

#[async_trait]
pub trait SynthesisService: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio, VoiceError>;
}

/// Synthesis over HTTP. The response body is the encoded audio.
#[derive(Debug, Clone)]
pub struct HttpSynthesisService {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSynthesisService {
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
            config.synthesis_url.clone(),
            config.api_key().map(str::to_string),
            config.request_timeout(),
        )
    }
}

#[async_trait]
impl SynthesisService for HttpSynthesisService {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio, VoiceError> {
        if request.text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Synthesis(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                request.text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "service returned {}: {}",
                status, detail
            )));
        }

        let service_cache_hit = response
            .headers()
            .get(SERVICE_CACHE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("hit"));

        let bytes = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("failed to read audio: {}", e)))?;
        if bytes.is_empty() {
            return Err(VoiceError::Synthesis("service returned no audio".to_string()));
        }

        Ok(SynthesizedAudio {
            bytes: bytes.to_vec(),
            service_cache_hit,
        })
    }
}
