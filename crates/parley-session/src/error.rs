use parley_rtc::RtcError;
use parley_sync::SyncError;
use parley_types::{ErrorEvent, ErrorKind, SessionState};
use parley_voice::VoiceError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Rtc(#[from] RtcError),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("session is closed")]
    Closed,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Rtc(e) => e.kind(),
            Self::Voice(e) => e.kind(),
            Self::Sync(e) => e.kind(),
            Self::InvalidTransition { .. } | Self::Closed => ErrorKind::InvalidTransition,
        }
    }

    pub fn to_event(&self) -> ErrorEvent {
        ErrorEvent::new(self.kind(), self.to_string())
    }
}
