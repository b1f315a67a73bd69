use parley_types::{ErrorEvent, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("microphone permission denied: {0}")]
    Permission(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("transcription error: {0}")]
    Transcription(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("reasoning error: {0}")]
    Reasoning(String),

    #[error("playback error: {0}")]
    Playback(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl VoiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            // Both leave the session without a microphone.
            Self::Permission(_) | Self::Device(_) => ErrorKind::Permission,
            Self::Transcription(_) => ErrorKind::Transcription,
            Self::Synthesis(_) => ErrorKind::Synthesis,
            Self::Reasoning(_) => ErrorKind::Reasoning,
            Self::Playback(_) => ErrorKind::Playback,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub fn to_event(&self) -> ErrorEvent {
        ErrorEvent::new(self.kind(), self.to_string())
    }
}
