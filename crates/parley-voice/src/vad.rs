//! Voice activity detection.
//!
//! Speech detection uses two thresholds over a frequency-domain energy
//! reading. Speech starts when energy rises above `speech_threshold`. It
//! ends only after energy has stayed below `silence_threshold` for
//! `silence_duration_ms`. Energy between the two thresholds neither starts
//! speech nor arms the silence timer, which keeps background noise from
//! toggling the detector.

use crate::error::VoiceError;
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Analyser floor and ceiling in dBFS. Bins are mapped linearly onto 0..1
/// between them.
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

fn default_speech_threshold() -> f32 {
    0.05
}

fn default_silence_threshold() -> f32 {
    0.02
}

fn default_silence_duration_ms() -> u64 {
    800
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "default_speech_threshold")]
    pub speech_threshold: f32,
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: default_speech_threshold(),
            silence_threshold: default_silence_threshold(),
            silence_duration_ms: default_silence_duration_ms(),
        }
    }
}

impl VadConfig {
    pub fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.silence_duration_ms)
    }

    /// Rejects thresholds outside 0..=1 and a silence threshold that is not
    /// strictly below the speech threshold.
    pub fn validate(&self) -> Result<(), VoiceError> {
        for (name, value) in [
            ("speech_threshold", self.speech_threshold),
            ("silence_threshold", self.silence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(VoiceError::Config(format!(
                    "{} must be within 0..=1, got {}",
                    name, value
                )));
            }
        }
        if self.silence_threshold >= self.speech_threshold {
            return Err(VoiceError::Config(format!(
                "silence_threshold ({}) must be below speech_threshold ({})",
                self.silence_threshold, self.speech_threshold
            )));
        }
        Ok(())
    }
}

/// Detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Idle,
    Speaking,
    /// Speaking, with energy below the silence threshold since the held
    /// instant.
    MaybeSilence(Instant),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    SpeechStart,
    SpeechEnd,
}

/// Hysteresis state machine. Time is supplied by the caller so the detector
/// can be driven from a paused runtime clock or directly in tests.
#[derive(Debug, Clone)]
pub struct VadDetector {
    config: VadConfig,
    state: VadState,
}

impl VadDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: VadState::Idle,
        }
    }

    pub fn config(&self) -> VadConfig {
        self.config
    }

    /// Replaces the thresholds. Current speech state is kept.
    pub fn set_config(&mut self, config: VadConfig) {
        self.config = config;
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn is_speaking(&self) -> bool {
        !matches!(self.state, VadState::Idle)
    }

    pub fn has_pending_silence(&self) -> bool {
        matches!(self.state, VadState::MaybeSilence(_))
    }

    /// Returns to idle and drops any pending silence timer.
    pub fn reset(&mut self) {
        self.state = VadState::Idle;
    }

    /// Feeds one energy reading taken at `now`.
    pub fn observe(&mut self, energy: f32, now: Instant) -> Option<VadTransition> {
        let loud = energy > self.config.speech_threshold;
        let quiet = energy < self.config.silence_threshold;

        match self.state {
            VadState::Idle => {
                if loud {
                    self.state = VadState::Speaking;
                    return Some(VadTransition::SpeechStart);
                }
                None
            }
            VadState::Speaking => {
                if quiet {
                    self.state = VadState::MaybeSilence(now);
                }
                None
            }
            VadState::MaybeSilence(since) => {
                if loud {
                    self.state = VadState::Speaking;
                    return None;
                }
                if now.saturating_duration_since(since) >= self.config.silence_duration() {
                    self.state = VadState::Idle;
                    return Some(VadTransition::SpeechEnd);
                }
                None
            }
        }
    }
}

/// Computes a 0..1 energy reading from the frequency content of a window of
/// time-domain samples.
///
/// Each bin's magnitude is converted to decibels and mapped onto 0..1
/// between -100 dBFS and -30 dBFS, the same scale a browser audio analyser
/// reports. The reading is the RMS of those normalized bins.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buf: Vec<Complex32>,
}

impl SpectrumAnalyzer {
    pub fn new(fft_len: usize) -> Self {
        let fft_len = fft_len.max(2);
        let mut planner = FftPlanner::<f32>::new();
        Self {
            fft: planner.plan_fft_forward(fft_len),
            window: blackman_window(fft_len),
            buf: vec![Complex32::new(0.0, 0.0); fft_len],
        }
    }

    pub fn fft_len(&self) -> usize {
        self.window.len()
    }

    /// Uses the most recent `fft_len` samples. Shorter input is zero padded.
    pub fn energy(&mut self, samples: &[f32]) -> f32 {
        let fft_len = self.window.len();
        let recent = &samples[samples.len().saturating_sub(fft_len)..];

        for (i, c) in self.buf.iter_mut().enumerate() {
            let sample = recent.get(i).copied().unwrap_or(0.0);
            *c = Complex32::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buf);

        let bins = fft_len / 2;
        let scale = 1.0 / fft_len as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        let mut sum_squares = 0.0f32;
        for c in self.buf.iter().take(bins) {
            let magnitude = c.norm() * scale;
            if magnitude <= 0.0 {
                continue;
            }
            let db = 20.0 * magnitude.log10();
            let level = ((db - MIN_DECIBELS) / range).clamp(0.0, 1.0);
            sum_squares += level * level;
        }
        (sum_squares / bins as f32).sqrt()
    }
}

fn blackman_window(len: usize) -> Vec<f32> {
    let denom = (len - 1) as f32;
    (0..len)
        .map(|n| {
            let x = 2.0 * std::f32::consts::PI * n as f32 / denom;
            0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
        })
        .collect()
}
