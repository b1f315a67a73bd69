//! Engine configuration loading from file and environment variables.

use parley_rtc::RtcConfig;
use parley_sync::{SyncError, TokenAuth};
use parley_voice::{CaptureConfig, PipelineConfig, ServiceConfig, SynthesisConfig, VadConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Peer connection tuning.
    #[serde(default)]
    pub rtc: RtcConfig,

    /// Microphone chunking and capture constraints.
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Voice activity detection thresholds.
    #[serde(default)]
    pub vad: VadConfig,

    /// Transcript queue behaviour.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Voice and speech cache.
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// External service endpoints.
    #[serde(default)]
    pub services: ServiceConfig,

    /// Multi-observer replication.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_token_ttl_seconds() -> u64 {
    parley_sync::auth::DEFAULT_TOKEN_TTL_SECS
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Replicate session events to other observers.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// HMAC secret for session tokens.
    #[serde(default, skip_serializing)]
    pub token_secret: String,
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_secret: String::new(),
            token_ttl_seconds: default_token_ttl_seconds(),
        }
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("enabled", &self.enabled)
            .field("token_secret", &"[REDACTED]")
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .finish()
    }
}

impl SyncConfig {
    /// Issues a token for `user_id` and returns an authenticator holding it.
    pub fn token_auth(&self, user_id: &str) -> Result<TokenAuth, SyncError> {
        if self.token_secret.is_empty() {
            return Err(SyncError::Unauthenticated(
                "no token secret configured".to_string(),
            ));
        }
        let token = parley_sync::generate_session_token(
            user_id,
            self.token_secret.as_bytes(),
            self.token_ttl_seconds,
        )?;
        Ok(TokenAuth::new(self.token_secret.as_bytes()).with_token(token))
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PARLEY_LOG_LEVEL` overrides `logging.level`
/// - `PARLEY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `PARLEY_TRANSCRIPTION_URL`, `PARLEY_SYNTHESIS_URL`, `PARLEY_REASONING_URL`
///   override the matching `services` endpoint
/// - `PARLEY_API_KEY` overrides `services.api_key`
/// - `PARLEY_VOICE_ID` overrides `synthesis.voice.voice_id`
/// - `PARLEY_LANGUAGE` overrides `pipeline.language`
/// - `PARLEY_SYNC_SECRET` overrides `sync.token_secret`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting VAD thresholds are inconsistent.
pub fn load_config(path: Option<&str>) -> Result<EngineConfig, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

pub(crate) fn load_config_with(
    path: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<EngineConfig, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                EngineConfig::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => EngineConfig::default(),
    };

    if let Some(level) = env("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(url) = env("PARLEY_TRANSCRIPTION_URL") {
        config.services.transcription_url = url;
    }
    if let Some(url) = env("PARLEY_SYNTHESIS_URL") {
        config.services.synthesis_url = url;
    }
    if let Some(url) = env("PARLEY_REASONING_URL") {
        config.services.reasoning_url = url;
    }
    if let Some(key) = env("PARLEY_API_KEY") {
        config.services.api_key = key;
    }
    if let Some(voice_id) = env("PARLEY_VOICE_ID") {
        config.synthesis.voice.voice_id = voice_id;
    }
    if let Some(language) = env("PARLEY_LANGUAGE") {
        config.pipeline.language = language;
    }
    if let Some(secret) = env("PARLEY_SYNC_SECRET") {
        config.sync.token_secret = secret;
    }

    config
        .vad
        .validate()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    Ok(config)
}
