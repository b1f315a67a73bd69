//! Voice profile and synthesis model definitions.
//!
//! A `VoiceProfile` maps a logical voice ID to the synthesis model that
//! renders it. The voice ID is part of the speech cache key, so two profiles
//! with the same ID always share cached audio.

use serde::{Deserialize, Serialize};

/// Supported synthesis model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisModel {
    /// Low-latency model tuned for conversational turn-taking.
    #[default]
    Turbo,
    /// Higher quality, slower model.
    MultilingualV2,
    /// Fastest model, lowest fidelity.
    Flash,
}

impl SynthesisModel {
    /// Returns the identifier sent to the synthesis service.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Turbo => "turbo_v2_5",
            Self::MultilingualV2 => "multilingual_v2",
            Self::Flash => "flash_v2_5",
        }
    }
}

/// A voice profile configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// Identifier understood by the synthesis service.
    pub voice_id: String,
    /// Human-readable name.
    pub name: String,
    /// The synthesis model used for this voice.
    #[serde(default)]
    pub model: SynthesisModel,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            voice_id: "default".to_string(),
            name: "Default Voice".to_string(),
            model: SynthesisModel::Turbo,
        }
    }
}
