//! Shared types for the Parley voice engine.
//!
//! This crate provides the data model used across all Parley crates:
//! session lifecycle states, conversation turns, network quality tiers, and
//! the error taxonomy surfaced to observers as discrete error events.
//!
//! No crate in the workspace depends on anything *except* `parley-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

use serde::{Deserialize, Serialize};

mod session;
pub mod voice;

pub use session::{ConversationTurn, FunctionCall, FunctionResult, Session};

/// Lifecycle state of a voice session.
///
/// `Listening`, `Processing` and `Speaking` are mutually exclusive and form
/// the conversational cycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session created but not yet connecting.
    #[default]
    Idle,
    /// Transport and capture are being set up.
    Connecting,
    /// Waiting for the user to speak.
    Listening,
    /// A transcript is being turned into a reply.
    Processing,
    /// A reply is being played back.
    Speaking,
    /// Unrecoverable failure; the session can only be reset or closed.
    Error,
    /// Explicitly disconnected. Terminal.
    Closed,
}

impl SessionState {
    /// Returns the string label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::Error => "error",
            Self::Closed => "closed",
        }
    }

    /// Whether this state is part of the listen/process/speak cycle.
    pub fn is_conversational(self) -> bool {
        matches!(self, Self::Listening | Self::Processing | Self::Speaking)
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human speaking into the microphone.
    User,
    /// The AI reply.
    Assistant,
    /// A tool/function exchange.
    Function,
}

/// Five-tier ordinal network quality classification.
///
/// Ordered from best to worst, so `Excellent < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl QualityTier {
    /// Classifies a transport sample from packet loss (percent) and round-trip
    /// time (milliseconds).
    ///
    /// The mapping is monotone: increasing either loss or RTT never yields a
    /// better tier.
    pub fn classify(packet_loss_pct: f64, rtt_ms: f64) -> Self {
        if packet_loss_pct < 1.0 && rtt_ms < 150.0 {
            Self::Excellent
        } else if packet_loss_pct < 3.0 && rtt_ms < 300.0 {
            Self::Good
        } else if packet_loss_pct < 5.0 && rtt_ms < 500.0 {
            Self::Fair
        } else if packet_loss_pct < 10.0 && rtt_ms < 1000.0 {
            Self::Poor
        } else {
            Self::Critical
        }
    }

    /// Returns the string label for this tier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error categories surfaced to observers.
///
/// Per-chunk and per-turn kinds (`Transcription`, `Synthesis`, `Reasoning`,
/// `Playback`, `Auth`) are non-fatal. `Permission` and `Connection` move the
/// session to [`SessionState::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Permission,
    Connection,
    Negotiation,
    Transcription,
    Synthesis,
    Reasoning,
    Playback,
    Auth,
    Config,
    InvalidTransition,
}

impl ErrorKind {
    /// Whether an error of this kind ends the conversational cycle.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Permission | Self::Connection)
    }

    /// Returns the string label for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Permission => "permission",
            Self::Connection => "connection",
            Self::Negotiation => "negotiation",
            Self::Transcription => "transcription",
            Self::Synthesis => "synthesis",
            Self::Reasoning => "reasoning",
            Self::Playback => "playback",
            Self::Auth => "auth",
            Self::Config => "config",
            Self::InvalidTransition => "invalid_transition",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discrete error event carrying kind and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorEvent {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
