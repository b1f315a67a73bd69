//! The session's outward event stream.

use crate::state::StateChange;
use parley_rtc::{IceCandidate, NetworkQualitySample};
use parley_sync::SyncEvent;
use parley_types::ErrorEvent;
use parley_voice::{ToolCallRecord, TranscriptionResult};

/// Everything an observer of a [`VoiceSession`](crate::VoiceSession) can see.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(StateChange),
    SpeechStarted,
    SpeechEnded,
    /// Microphone input energy, 0..1.
    Level(f32),
    Transcript(TranscriptionResult),
    ToolCall(ToolCallRecord),
    Reply(String),
    Quality(NetworkQualitySample),
    /// A local candidate to forward to the remote peer over signaling.
    IceCandidate(IceCandidate),
    NegotiationNeeded,
    Error(ErrorEvent),
    /// Replicated from another observer of the same session.
    Remote(SyncEvent),
}

impl SessionEvent {
    /// Returns the string label for this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StateChanged(_) => "state_changed",
            Self::SpeechStarted => "speech_started",
            Self::SpeechEnded => "speech_ended",
            Self::Level(_) => "level",
            Self::Transcript(_) => "transcript",
            Self::ToolCall(_) => "tool_call",
            Self::Reply(_) => "reply",
            Self::Quality(_) => "quality",
            Self::IceCandidate(_) => "ice_candidate",
            Self::NegotiationNeeded => "negotiation_needed",
            Self::Error(_) => "error",
            Self::Remote(_) => "remote",
        }
    }
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
