use parley_types::{ErrorEvent, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("synchronizer is not initialized")]
    NotInitialized,

    #[error("channel error: {0}")]
    Channel(String),

    #[error("malformed payload: {0}")]
    Payload(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated(_) | Self::NotInitialized => ErrorKind::Auth,
            Self::Channel(_) | Self::Payload(_) => ErrorKind::Connection,
        }
    }

    pub fn to_event(&self) -> ErrorEvent {
        ErrorEvent::new(self.kind(), self.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Payload(e.to_string())
    }
}
