//! Microphone capture.
//!
//! [`AudioCaptureEngine`] runs two loops over one opened [`MediaStream`]:
//!
//! - the chunk loop records fixed-length chunks back to back, separated by a
//!   short gap, and publishes every chunk large enough to carry speech;
//! - the VAD loop samples the stream's analysis window every few
//!   milliseconds, feeds the energy reading to a [`VadDetector`] and
//!   publishes speech start/end transitions and level readings.
//!
//! Both loops stop when the engine is stopped or the event receiver is
//! dropped.

use crate::config::CaptureConfig;
use crate::error::VoiceError;
use crate::vad::{SpectrumAnalyzer, VadConfig, VadDetector, VadTransition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Samples handed to the spectrum analyser on every VAD tick.
const ANALYSIS_WINDOW: usize = 512;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Processing requested from the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
    pub channel_count: u16,
}

impl From<&CaptureConfig> for CaptureConstraints {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
            auto_gain_control: config.auto_gain_control,
            sample_rate: config.sample_rate,
            channel_count: 1,
        }
    }
}

/// A microphone that can be opened with a set of constraints.
#[async_trait]
pub trait AudioDevice: Send + Sync {
    /// Fails with [`VoiceError::Permission`] when access is denied and
    /// [`VoiceError::Device`] when no usable input exists.
    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn MediaStream>, VoiceError>;
}

/// An opened capture stream.
#[async_trait]
pub trait MediaStream: Send {
    /// Begins encoding a new recording.
    fn start_recording(&mut self) -> Result<(), VoiceError>;

    /// Finishes the current recording and returns its encoded bytes.
    async fn stop_recording(&mut self) -> Result<Vec<u8>, VoiceError>;

    fn is_recording(&self) -> bool;

    /// Copies the most recent time-domain samples into `out` and returns
    /// how many were written.
    fn analysis_window(&mut self, out: &mut [f32]) -> usize;

    /// Releases every underlying track. Returns the number stopped.
    fn stop_tracks(&mut self) -> usize;
}

/// One recorded chunk of encoded audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Chunk(AudioChunk),
    SpeechStart,
    SpeechEnd,
    /// Current input energy, 0..1.
    Level(f32),
    /// The stream stopped producing audio. Capture has ended.
    Failed(VoiceError),
}

type SharedStream = Arc<tokio::sync::Mutex<Box<dyn MediaStream>>>;

struct RunningCapture {
    stream: SharedStream,
    chunk_task: JoinHandle<()>,
    vad_task: JoinHandle<()>,
}

pub struct AudioCaptureEngine {
    device: Arc<dyn AudioDevice>,
    config: CaptureConfig,
    vad_config: Arc<RwLock<VadConfig>>,
    detector: Arc<Mutex<VadDetector>>,
    running: Option<RunningCapture>,
}

impl AudioCaptureEngine {
    pub fn new(
        device: Arc<dyn AudioDevice>,
        config: CaptureConfig,
        vad_config: VadConfig,
    ) -> Result<Self, VoiceError> {
        vad_config.validate()?;
        Ok(Self {
            device,
            config,
            vad_config: Arc::new(RwLock::new(vad_config)),
            detector: Arc::new(Mutex::new(VadDetector::new(vad_config))),
            running: None,
        })
    }

    /// Opens the microphone and starts the chunk and VAD loops.
    ///
    /// A denied permission fails here, before any loop is started.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<CaptureEvent>, VoiceError> {
        if self.running.is_some() {
            return Err(VoiceError::Device("capture already running".to_string()));
        }

        let constraints = CaptureConstraints::from(&self.config);
        let stream = self.device.open(&constraints).await.map_err(|e| {
            warn!(error = %e, "failed to open capture device");
            e
        })?;
        let stream: SharedStream = Arc::new(tokio::sync::Mutex::new(stream));

        lock_detector(&self.detector).reset();

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let chunk_task = tokio::spawn(run_chunk_loop(
            stream.clone(),
            tx.clone(),
            self.config.clone(),
        ));
        let vad_task = tokio::spawn(run_vad_loop(
            stream.clone(),
            self.detector.clone(),
            self.vad_config.clone(),
            tx,
            self.config.vad_interval(),
            self.config.level_interval(),
        ));

        info!(
            sample_rate = constraints.sample_rate,
            chunk_ms = self.config.chunk_duration_ms,
            "audio capture started"
        );
        self.running = Some(RunningCapture {
            stream,
            chunk_task,
            vad_task,
        });
        Ok(rx)
    }

    /// Replaces the VAD thresholds. Takes effect on the next VAD tick.
    pub fn set_vad_config(&self, config: VadConfig) -> Result<(), VoiceError> {
        config.validate()?;
        match self.vad_config.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
        debug!(
            speech = config.speech_threshold,
            silence = config.silence_threshold,
            silence_ms = config.silence_duration_ms,
            "vad config updated"
        );
        Ok(())
    }

    pub fn vad_config(&self) -> VadConfig {
        read_vad_config(&self.vad_config)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn is_speaking(&self) -> bool {
        lock_detector(&self.detector).is_speaking()
    }

    /// Stops both loops, any active recording and every track. Safe to call
    /// repeatedly.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.chunk_task.abort();
        running.vad_task.abort();
        lock_detector(&self.detector).reset();

        let mut stream = running.stream.lock().await;
        if stream.is_recording() {
            if let Err(e) = stream.stop_recording().await {
                debug!(error = %e, "discarding in-progress recording failed");
            }
        }
        let tracks = stream.stop_tracks();
        info!(tracks, "audio capture stopped");
    }
}

impl Drop for AudioCaptureEngine {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.chunk_task.abort();
            running.vad_task.abort();
        }
    }
}

fn lock_detector(detector: &Mutex<VadDetector>) -> MutexGuard<'_, VadDetector> {
    detector.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_vad_config(config: &RwLock<VadConfig>) -> VadConfig {
    match config.read() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

async fn run_chunk_loop(
    stream: SharedStream,
    tx: mpsc::Sender<CaptureEvent>,
    config: CaptureConfig,
) {
    loop {
        let started_at = Utc::now();
        let started = Instant::now();

        if let Err(e) = stream.lock().await.start_recording() {
            warn!(error = %e, "could not start recording");
            let _ = tx.send(CaptureEvent::Failed(e)).await;
            return;
        }

        tokio::time::sleep(config.chunk_duration()).await;

        let recorded = stream.lock().await.stop_recording().await;
        match recorded {
            Ok(data) if data.len() < config.min_chunk_bytes => {
                debug!(bytes = data.len(), "discarding undersized chunk");
            }
            Ok(data) => {
                let chunk = AudioChunk {
                    data,
                    started_at,
                    duration: started.elapsed(),
                };
                if tx.send(CaptureEvent::Chunk(chunk)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "recording failed, chunk dropped");
            }
        }

        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(config.chunk_gap()).await;
    }
}

async fn run_vad_loop(
    stream: SharedStream,
    detector: Arc<Mutex<VadDetector>>,
    vad_config: Arc<RwLock<VadConfig>>,
    tx: mpsc::Sender<CaptureEvent>,
    vad_interval: Duration,
    level_interval: Duration,
) {
    let mut analyzer = SpectrumAnalyzer::new(ANALYSIS_WINDOW);
    let mut window = vec![0.0f32; ANALYSIS_WINDOW];
    let mut ticker = tokio::time::interval(vad_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_level: Option<Instant> = None;

    loop {
        let now = ticker.tick().await;

        let written = stream.lock().await.analysis_window(&mut window);
        let energy = analyzer.energy(&window[..written.min(window.len())]);

        let transition = {
            let mut detector = lock_detector(&detector);
            detector.set_config(read_vad_config(&vad_config));
            detector.observe(energy, now.into_std())
        };

        if let Some(transition) = transition {
            let event = match transition {
                VadTransition::SpeechStart => CaptureEvent::SpeechStart,
                VadTransition::SpeechEnd => CaptureEvent::SpeechEnd,
            };
            debug!(?transition, energy, "vad transition");
            if tx.send(event).await.is_err() {
                return;
            }
        }

        let level_due = last_level.map_or(true, |at| now.duration_since(at) >= level_interval);
        if level_due {
            last_level = Some(now);
            // Meter readings are disposable; never block detection on them.
            if let Err(mpsc::error::TrySendError::Closed(_)) =
                tx.try_send(CaptureEvent::Level(energy))
            {
                return;
            }
        }
    }
}
