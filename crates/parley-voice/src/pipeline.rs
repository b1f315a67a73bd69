//! Ordered transcript processing.
//!
//! Audio chunks are transcribed as they arrive, but the resulting
//! transcripts are handed to the [`TranscriptHandler`] strictly one at a time
//! in arrival order. A transcript arriving while another is being handled
//! waits in a FIFO queue; nothing is ever dropped for being late.

use crate::capture::AudioChunk;
use crate::config::PipelineConfig;
use crate::error::VoiceError;
use crate::stt::{TranscriptionRequest, TranscriptionService};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_types::ErrorEvent;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default capacity for the transcription broadcast channel.
const TRANSCRIPTION_BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionResult {
    pub text: String,
    pub confidence: f32,
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTranscript {
    pub transcript: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionEvent {
    Transcribed(TranscriptionResult),
    /// The chunk was dropped. Capture continues.
    Failed(ErrorEvent),
}

/// Receives queued transcripts one at a time.
#[async_trait]
pub trait TranscriptHandler: Send + Sync {
    /// Called from [`TranscriptionPipeline::submit`] once a chunk has been
    /// transcribed. The result is only queued after this returns, so anything
    /// published here precedes whatever `handle` publishes for the same item.
    async fn transcribed(&self, _result: &TranscriptionResult) {}

    async fn handle(&self, item: QueuedTranscript);
}

pub struct TranscriptionPipeline {
    service: Arc<dyn TranscriptionService>,
    session_id: String,
    language: String,
    handler: Arc<dyn TranscriptHandler>,
    queue_tx: mpsc::UnboundedSender<QueuedTranscript>,
    queued: Arc<AtomicUsize>,
    in_flight: Arc<AtomicBool>,
    events: broadcast::Sender<TranscriptionEvent>,
    worker: JoinHandle<()>,
}

impl TranscriptionPipeline {
    /// Spawns the queue worker. Must be called inside a Tokio runtime.
    pub fn new(
        service: Arc<dyn TranscriptionService>,
        handler: Arc<dyn TranscriptHandler>,
        session_id: impl Into<String>,
        config: &PipelineConfig,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(TRANSCRIPTION_BROADCAST_CAPACITY);
        let queued = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn(run_worker(
            queue_rx,
            handler.clone(),
            queued.clone(),
            in_flight.clone(),
            config.inter_item_delay(),
        ));

        Self {
            service,
            session_id: session_id.into(),
            language: config.language.clone(),
            handler,
            queue_tx,
            queued,
            in_flight,
            events,
            worker,
        }
    }

    /// Transcribes one chunk, hands the result to
    /// [`TranscriptHandler::transcribed`] and then queues it.
    ///
    /// Empty transcripts are dropped silently. A failed transcription drops
    /// the chunk and publishes [`TranscriptionEvent::Failed`].
    pub async fn submit(&self, chunk: AudioChunk) {
        let request = TranscriptionRequest {
            session_id: self.session_id.clone(),
            audio: chunk.data,
            language: self.language.clone(),
        };

        let response = match self.service.transcribe(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "transcription failed, chunk dropped");
                let _ = self.events.send(TranscriptionEvent::Failed(e.to_event()));
                return;
            }
        };

        let text = response.transcript.trim();
        if text.is_empty() {
            debug!(session_id = %self.session_id, "empty transcript dropped");
            return;
        }

        let result = TranscriptionResult {
            text: text.to_string(),
            confidence: response.confidence.unwrap_or(1.0),
            is_final: true,
            timestamp: chunk.started_at,
        };
        let _ = self
            .events
            .send(TranscriptionEvent::Transcribed(result.clone()));
        self.handler.transcribed(&result).await;

        if let Err(e) = self.enqueue(result.text, result.timestamp) {
            warn!(session_id = %self.session_id, error = %e, "transcript not queued");
        }
    }

    /// Queues a transcript directly, bypassing transcription.
    pub fn enqueue(
        &self,
        transcript: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), VoiceError> {
        let item = QueuedTranscript {
            transcript: transcript.into(),
            timestamp,
        };
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.queue_tx.send(item).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(VoiceError::Transcription(
                "transcript queue is shut down".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a transcript is currently being handled.
    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Transcripts waiting behind the one in flight.
    pub fn queue_len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptionEvent> {
        self.events.subscribe()
    }

    /// Stops the worker. Queued transcripts are discarded.
    pub fn shutdown(&self) {
        self.worker.abort();
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

impl Drop for TranscriptionPipeline {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(
    mut queue_rx: mpsc::UnboundedReceiver<QueuedTranscript>,
    handler: Arc<dyn TranscriptHandler>,
    queued: Arc<AtomicUsize>,
    in_flight: Arc<AtomicBool>,
    inter_item_delay: Duration,
) {
    while let Some(item) = queue_rx.recv().await {
        in_flight.store(true, Ordering::SeqCst);
        queued.fetch_sub(1, Ordering::SeqCst);

        handler.handle(item).await;

        in_flight.store(false, Ordering::SeqCst);
        if !inter_item_delay.is_zero() {
            tokio::time::sleep(inter_item_delay).await;
        }
    }
}
