use parley_types::{ErrorEvent, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RtcError {
    /// A negotiation primitive was invoked before `create_connection` or
    /// after `close`, or the transport rejected a description/candidate.
    #[error("negotiation error: {0}")]
    Negotiation(String),

    /// ICE/transport failure that survived the automatic restart.
    #[error("connection error: {0}")]
    Connection(String),

    /// The underlying transport failed an operation.
    #[error("transport error: {0}")]
    Transport(String),
}

impl RtcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Negotiation(_) => ErrorKind::Negotiation,
            Self::Connection(_) | Self::Transport(_) => ErrorKind::Connection,
        }
    }

    pub fn to_event(&self) -> ErrorEvent {
        ErrorEvent::new(self.kind(), self.to_string())
    }
}
