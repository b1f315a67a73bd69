use parley_types::voice::{SynthesisModel, VoiceProfile};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

fn default_chunk_duration_ms() -> u64 {
    1500
}

fn default_chunk_gap_ms() -> u64 {
    50
}

fn default_min_chunk_bytes() -> usize {
    1000
}

fn default_vad_interval_ms() -> u64 {
    16
}

fn default_level_interval_ms() -> u64 {
    100
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_true() -> bool {
    true
}

/// Microphone capture settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Length of each recorded chunk.
    #[serde(default = "default_chunk_duration_ms")]
    pub chunk_duration_ms: u64,
    /// Pause between the end of one chunk and the start of the next.
    #[serde(default = "default_chunk_gap_ms")]
    pub chunk_gap_ms: u64,
    /// Chunks smaller than this carry no usable speech and are discarded.
    #[serde(default = "default_min_chunk_bytes")]
    pub min_chunk_bytes: usize,
    /// VAD sampling period. 16ms is roughly one display frame.
    #[serde(default = "default_vad_interval_ms")]
    pub vad_interval_ms: u64,
    /// How often a level reading is published for metering.
    #[serde(default = "default_level_interval_ms")]
    pub level_interval_ms: u64,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_true")]
    pub echo_cancellation: bool,
    #[serde(default = "default_true")]
    pub noise_suppression: bool,
    #[serde(default = "default_true")]
    pub auto_gain_control: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_duration_ms: default_chunk_duration_ms(),
            chunk_gap_ms: default_chunk_gap_ms(),
            min_chunk_bytes: default_min_chunk_bytes(),
            vad_interval_ms: default_vad_interval_ms(),
            level_interval_ms: default_level_interval_ms(),
            sample_rate: default_sample_rate(),
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl CaptureConfig {
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(self.chunk_duration_ms)
    }

    pub fn chunk_gap(&self) -> Duration {
        Duration::from_millis(self.chunk_gap_ms)
    }

    pub fn vad_interval(&self) -> Duration {
        Duration::from_millis(self.vad_interval_ms.max(1))
    }

    pub fn level_interval(&self) -> Duration {
        Duration::from_millis(self.level_interval_ms)
    }
}

fn default_inter_item_delay_ms() -> u64 {
    100
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Pause after each processed transcript before the next is taken.
    #[serde(default = "default_inter_item_delay_ms")]
    pub inter_item_delay_ms: u64,
    /// Language hint passed to the transcription service.
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inter_item_delay_ms: default_inter_item_delay_ms(),
            language: default_language(),
        }
    }
}

impl PipelineConfig {
    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_ms)
    }
}

fn default_cache_max_entries() -> usize {
    100
}

fn default_cache_ttl_seconds() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthesisConfig {
    #[serde(default)]
    pub voice: VoiceProfile,
    /// Upper bound on cached utterances. Oldest entries go first.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Cached audio older than this is synthesized again.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            voice: VoiceProfile::default(),
            cache_max_entries: default_cache_max_entries(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

impl SynthesisConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn model(&self) -> SynthesisModel {
        self.voice.model
    }
}

fn default_transcription_url() -> String {
    "http://127.0.0.1:8080/transcribe".to_string()
}

fn default_synthesis_url() -> String {
    "http://127.0.0.1:8080/synthesize".to_string()
}

fn default_reasoning_url() -> String {
    "http://127.0.0.1:8080/respond".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

/// Endpoints of the external transcription, synthesis and reasoning services.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    #[serde(default = "default_transcription_url")]
    pub transcription_url: String,
    #[serde(default = "default_synthesis_url")]
    pub synthesis_url: String,
    #[serde(default = "default_reasoning_url")]
    pub reasoning_url: String,
    /// Identifier of the reasoning model, recorded on each session.
    #[serde(default = "default_reasoning_model")]
    pub reasoning_model: String,
    /// Bearer token sent to every service. Empty means no auth header.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_reasoning_model() -> String {
    "default".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            transcription_url: default_transcription_url(),
            synthesis_url: default_synthesis_url(),
            reasoning_url: default_reasoning_url(),
            reasoning_model: default_reasoning_model(),
            api_key: String::new(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("transcription_url", &self.transcription_url)
            .field("synthesis_url", &self.synthesis_url)
            .field("reasoning_url", &self.reasoning_url)
            .field("reasoning_model", &self.reasoning_model)
            .field("api_key", &"[REDACTED]")
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn api_key(&self) -> Option<&str> {
        if self.api_key.is_empty() {
            None
        } else {
            Some(&self.api_key)
        }
    }
}
