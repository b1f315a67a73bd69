//! Voice pipeline for the Parley engine.
//!
//! Turns microphone audio into conversation and conversation back into
//! audio:
//!
//! ```text
//! AudioCaptureEngine ──chunks──▶ TranscriptionPipeline ──FIFO──▶ TranscriptHandler
//!        │ VAD events                                               │
//!        ▼                                                          ▼
//!   speech start/end                         ResponseProcessor ──▶ SpeechSynthesisCache
//! ```
//!
//! Transcription, reasoning and synthesis are external services consumed
//! through the [`TranscriptionService`], [`ReasoningService`] and
//! [`SynthesisService`] traits; HTTP clients for each are provided. The
//! microphone and the speaker sit behind [`AudioDevice`] and [`AudioPlayer`].
//!
//! Every component here is owned by exactly one session. Nothing is shared
//! process-wide.

pub mod cache;
pub mod capture;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod response;
pub mod speech;
pub mod stt;
pub mod tts;
pub mod vad;

pub use cache::{AudioCache, CacheKey, CacheStats, CachedAudioEntry};
pub use capture::{
    AudioCaptureEngine, AudioChunk, AudioDevice, CaptureConstraints, CaptureEvent, MediaStream,
};
pub use config::{CaptureConfig, PipelineConfig, ServiceConfig, SynthesisConfig};
pub use error::VoiceError;
pub use pipeline::{
    QueuedTranscript, TranscriptHandler, TranscriptionEvent, TranscriptionPipeline,
    TranscriptionResult,
};
pub use response::{
    HttpReasoningService, ProcessedResponse, ReasoningRequest, ReasoningResponse,
    ReasoningService, ResponseProcessor, ToolCallRecord,
};
pub use speech::{AudioPlayer, PlaybackOutcome, SpeechEvent, SpeechSynthesisCache};
pub use stt::{
    HttpTranscriptionService, TranscriptionRequest, TranscriptionResponse, TranscriptionService,
};
pub use tts::{HttpSynthesisService, SynthesisRequest, SynthesisService, SynthesizedAudio};
pub use vad::{SpectrumAnalyzer, VadConfig, VadDetector, VadTransition};
