//! The per-session composition root.

use crate::config::{EngineConfig, SyncConfig};
use crate::error::SessionError;
use crate::event::SessionEvent;
use crate::state::{SessionStateMachine, StateChange};
use async_trait::async_trait;
use parley_rtc::{ConnectionEvent, PeerConnectionManager, PeerTransportFactory};
use parley_sync::{
    BroadcastSynchronizer, FunctionCallPayload, PresenceRecord, PubSub, SessionAuth, SyncError,
    SyncEvent,
};
use parley_types::{
    ConversationTurn, ErrorEvent, FunctionCall, FunctionResult, Session, SessionState,
};
use parley_voice::{
    AudioCaptureEngine, AudioDevice, AudioPlayer, CacheStats, CaptureEvent, HttpReasoningService,
    HttpSynthesisService, HttpTranscriptionService, QueuedTranscript, ReasoningService,
    ResponseProcessor, ServiceConfig, SpeechSynthesisCache, SynthesisService, ToolCallRecord,
    TranscriptHandler, TranscriptionEvent, TranscriptionPipeline, TranscriptionResult,
    TranscriptionService, VadConfig, VoiceError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SESSION_EVENT_CAPACITY: usize = 256;

/// What a session needs to replicate itself to other observers.
#[derive(Clone)]
pub struct BroadcastDeps {
    pub pubsub: Arc<dyn PubSub>,
    pub auth: Arc<dyn SessionAuth>,
}

impl BroadcastDeps {
    /// Issues a session token for `user_id` from the configured secret.
    pub fn with_token(
        pubsub: Arc<dyn PubSub>,
        config: &SyncConfig,
        user_id: &str,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            pubsub,
            auth: Arc::new(config.token_auth(user_id)?),
        })
    }
}

/// External collaborators of one session.
#[derive(Clone)]
pub struct SessionDeps {
    pub transport_factory: Arc<dyn PeerTransportFactory>,
    pub audio_device: Arc<dyn AudioDevice>,
    pub audio_player: Arc<dyn AudioPlayer>,
    pub transcription: Arc<dyn TranscriptionService>,
    pub reasoning: Arc<dyn ReasoningService>,
    pub synthesis: Arc<dyn SynthesisService>,
    /// `None` runs the session without replication.
    pub broadcast: Option<BroadcastDeps>,
}

impl SessionDeps {
    /// Wires the HTTP service clients described by `services`.
    pub fn http(
        services: &ServiceConfig,
        transport_factory: Arc<dyn PeerTransportFactory>,
        audio_device: Arc<dyn AudioDevice>,
        audio_player: Arc<dyn AudioPlayer>,
    ) -> Result<Self, VoiceError> {
        Ok(Self {
            transport_factory,
            audio_device,
            audio_player,
            transcription: Arc::new(HttpTranscriptionService::from_config(services)?),
            reasoning: Arc::new(HttpReasoningService::from_config(services)?),
            synthesis: Arc::new(HttpSynthesisService::from_config(services)?),
            broadcast: None,
        })
    }

    pub fn with_broadcast(mut self, broadcast: BroadcastDeps) -> Self {
        self.broadcast = Some(broadcast);
        self
    }
}

/// State shared by the driver tasks and the transcript queue worker.
struct SessionCore {
    machine: SessionStateMachine,
    responder: ResponseProcessor,
    speech: SpeechSynthesisCache,
    sync: Option<BroadcastSynchronizer>,
    events: broadcast::Sender<SessionEvent>,
    voice_id: String,
    user_id: String,
    /// Serialises apply-then-announce so observers see changes in order.
    transition_lock: Mutex<()>,
}

impl SessionCore {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    async fn transition(&self, to: SessionState) -> Result<Option<StateChange>, SessionError> {
        let _guard = self.transition_lock.lock().await;
        let Some(change) = self.machine.request(to)? else {
            return Ok(None);
        };
        self.emit(SessionEvent::StateChanged(change.clone()));
        if let Some(sync) = &self.sync {
            sync.broadcast_state_change(change.from, change.to).await;
        }
        Ok(Some(change))
    }

    /// Like [`transition`](Self::transition) for paths where a concurrent
    /// failure or close may already have moved the session on.
    async fn settle(&self, to: SessionState) -> bool {
        match self.transition(to).await {
            Ok(_) => true,
            Err(e) => {
                debug!(session_id = %self.machine.session_id(), %to, error = %e, "transition skipped");
                false
            }
        }
    }

    /// Publishes an error event. Fatal kinds move the session to `Error`.
    async fn report(&self, error: ErrorEvent) {
        let fatal = error.kind.is_fatal();
        warn!(
            session_id = %self.machine.session_id(),
            kind = %error.kind,
            fatal,
            message = %error.message,
            "session error"
        );
        self.emit(SessionEvent::Error(error));
        if fatal {
            self.settle(SessionState::Error).await;
        }
    }

    async fn broadcast_turn(&self, turn: &ConversationTurn) {
        if let Some(sync) = &self.sync {
            sync.broadcast_turn(turn).await;
        }
    }

    async fn record_tool_call(&self, call: ToolCallRecord) {
        let turn = ConversationTurn::function(
            FunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
            FunctionResult {
                name: call.name.clone(),
                status: call.status.clone(),
                result: call.result.clone(),
            },
        );
        if self.machine.append_turn(turn).is_err() {
            return;
        }
        if let Some(sync) = &self.sync {
            sync.broadcast_function_call(FunctionCallPayload {
                name: call.name.clone(),
                status: call.status.clone(),
                arguments: call.arguments.clone(),
                result: call.result.clone(),
            })
            .await;
        }
        self.emit(SessionEvent::ToolCall(call));
    }
}

#[async_trait]
impl TranscriptHandler for SessionCore {
    async fn transcribed(&self, result: &TranscriptionResult) {
        if let Some(sync) = &self.sync {
            sync.broadcast_transcription(&result.text, result.is_final, Some(result.confidence))
                .await;
        }
        self.emit(SessionEvent::Transcript(result.clone()));
    }

    async fn handle(&self, item: QueuedTranscript) {
        let state = self.machine.state();
        if !state.is_conversational() {
            debug!(session_id = %self.machine.session_id(), %state, "transcript ignored");
            return;
        }

        let history = self.machine.turns();
        let user_turn = ConversationTurn::user(item.transcript.clone());
        if self.machine.append_turn(user_turn.clone()).is_err() {
            return;
        }
        self.broadcast_turn(&user_turn).await;

        if !self.settle(SessionState::Processing).await {
            return;
        }

        let processed = match self.responder.process(&item.transcript, &history).await {
            Ok(processed) => processed,
            Err(e) => {
                self.report(e.to_event()).await;
                self.settle(SessionState::Listening).await;
                return;
            }
        };

        for call in processed.tool_calls {
            self.record_tool_call(call).await;
        }

        let Some(reply) = processed.reply_text else {
            self.settle(SessionState::Listening).await;
            return;
        };

        let assistant_turn = ConversationTurn::assistant(reply.clone());
        if self.machine.append_turn(assistant_turn.clone()).is_err() {
            return;
        }
        self.broadcast_turn(&assistant_turn).await;
        self.emit(SessionEvent::Reply(reply.clone()));

        if !self.settle(SessionState::Speaking).await {
            return;
        }
        let outcome = self.speech.speak(&reply, &self.voice_id).await;
        if let Err(e) = outcome.result {
            self.report(e.to_event()).await;
        }
        self.settle(SessionState::Listening).await;
    }
}

/// One voice conversation between a user and the assistant.
///
/// Owns every per-session component. Nothing is shared between sessions.
pub struct VoiceSession {
    core: Arc<SessionCore>,
    capture: Mutex<AudioCaptureEngine>,
    pipeline: Arc<TranscriptionPipeline>,
    connection: PeerConnectionManager,
    transport_factory: Arc<dyn PeerTransportFactory>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    ended: AtomicBool,
}

impl VoiceSession {
    /// Builds an idle session. Must be called inside a Tokio runtime.
    pub fn new(
        user_id: impl Into<String>,
        config: &EngineConfig,
        deps: SessionDeps,
    ) -> Result<Self, SessionError> {
        let user_id = user_id.into();
        let machine = SessionStateMachine::new(Session::new(
            user_id.clone(),
            config.services.reasoning_model.clone(),
        ));
        let session_id = machine.session_id();

        let sync = match (&deps.broadcast, config.sync.enabled) {
            (Some(broadcast), true) => Some(BroadcastSynchronizer::new(
                broadcast.pubsub.clone(),
                broadcast.auth.clone(),
                session_id.clone(),
            )),
            _ => None,
        };

        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        let core = Arc::new(SessionCore {
            machine,
            responder: ResponseProcessor::new(deps.reasoning, session_id.clone()),
            speech: SpeechSynthesisCache::new(deps.synthesis, deps.audio_player, &config.synthesis),
            sync,
            events,
            voice_id: config.synthesis.voice.voice_id.clone(),
            user_id,
            transition_lock: Mutex::new(()),
        });

        let capture = AudioCaptureEngine::new(
            deps.audio_device,
            config.capture.clone(),
            config.vad,
        )?;
        let pipeline = TranscriptionPipeline::new(
            deps.transcription,
            core.clone(),
            session_id.clone(),
            &config.pipeline,
        );

        info!(session_id = %session_id, user_id = %core.user_id, "session created");

        Ok(Self {
            core,
            capture: Mutex::new(capture),
            pipeline: Arc::new(pipeline),
            connection: PeerConnectionManager::new(config.rtc.clone()),
            transport_factory: deps.transport_factory,
            tasks: std::sync::Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
        })
    }

    /// Connects, opens the microphone and begins listening.
    ///
    /// A denied microphone or a failed connection leaves the session in
    /// `Error` and is returned. A broadcast join failure is reported as an
    /// error event and the session continues without replication.
    pub async fn start(&self) -> Result<(), SessionError> {
        let state = self.core.machine.state();
        if state != SessionState::Idle {
            return Err(SessionError::InvalidTransition {
                from: state,
                to: SessionState::Connecting,
            });
        }
        self.core.transition(SessionState::Connecting).await?;

        if let Some(sync) = &self.core.sync {
            let remote = sync.subscribe();
            match sync.initialize(&self.core.user_id).await {
                Ok(()) => self.spawn(forward_remote(self.core.clone(), remote)),
                Err(e) => {
                    // Replication is optional; the session carries on locally.
                    warn!(session_id = %self.core.machine.session_id(), error = %e, "broadcast join failed");
                    self.core.emit(SessionEvent::Error(e.to_event()));
                }
            }
        }

        let connection_events = match self
            .connection
            .create_connection(self.transport_factory.as_ref(), Vec::new())
            .await
        {
            Ok(rx) => rx,
            Err(e) => return Err(self.fail_start(e.into()).await),
        };

        let started = self.capture.lock().await.start().await;
        let capture_events = match started {
            Ok(rx) => rx,
            Err(e) => {
                self.connection.close().await;
                return Err(self.fail_start(e.into()).await);
            }
        };

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        self.spawn(submit_chunks(self.pipeline.clone(), chunk_rx));
        self.spawn(drive(
            self.core.clone(),
            capture_events,
            connection_events,
            self.pipeline.subscribe(),
            chunk_tx,
        ));

        self.core.transition(SessionState::Listening).await?;
        info!(session_id = %self.core.machine.session_id(), "session listening");
        Ok(())
    }

    async fn fail_start(&self, error: SessionError) -> SessionError {
        self.core.emit(SessionEvent::Error(error.to_event()));
        warn!(session_id = %self.core.machine.session_id(), error = %error, "session failed to start");
        self.core.settle(SessionState::Error).await;
        error
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(handle);
    }

    fn abort_tasks(&self) {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
    }

    /// Tears everything down and closes the session. Safe to call repeatedly.
    pub async fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }

        self.abort_tasks();
        self.capture.lock().await.stop().await;
        self.pipeline.shutdown();
        self.connection.close().await;
        self.core.settle(SessionState::Closed).await;
        if let Some(sync) = &self.core.sync {
            sync.cleanup().await;
        }

        let summary = self.core.machine.snapshot();
        info!(
            session_id = %summary.id,
            user_id = %summary.user_id,
            turns = summary.turns.len(),
            duration_ms = summary.duration().num_milliseconds(),
            "session ended"
        );
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.core.machine.state()
    }

    pub fn session_id(&self) -> String {
        self.core.machine.session_id()
    }

    pub fn snapshot(&self) -> Session {
        self.core.machine.snapshot()
    }

    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.core.machine.turns()
    }

    /// The peer connection, for signaling (offer/answer/candidates).
    pub fn connection(&self) -> &PeerConnectionManager {
        &self.connection
    }

    pub async fn set_vad_config(&self, config: VadConfig) -> Result<(), SessionError> {
        self.capture.lock().await.set_vad_config(config)?;
        Ok(())
    }

    /// Queues text as though it had been spoken.
    pub fn submit_text(&self, text: &str) -> Result<(), SessionError> {
        self.pipeline.enqueue(text, chrono::Utc::now())?;
        Ok(())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.core.speech.cache_stats()
    }

    pub async fn presence(&self) -> Vec<PresenceRecord> {
        match &self.core.sync {
            Some(sync) => sync.presence().await,
            None => Vec::new(),
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Feeds chunks to the pipeline one at a time, in capture order.
async fn submit_chunks(
    pipeline: Arc<TranscriptionPipeline>,
    mut chunks: mpsc::UnboundedReceiver<parley_voice::AudioChunk>,
) {
    while let Some(chunk) = chunks.recv().await {
        debug!(chunk_bytes = chunk.data.len(), "submitting chunk");
        pipeline.submit(chunk).await;
    }
}

async fn forward_remote(core: Arc<SessionCore>, mut remote: broadcast::Receiver<SyncEvent>) {
    loop {
        match remote.recv().await {
            Ok(event) => core.emit(SessionEvent::Remote(event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "remote event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Routes capture, connection and transcription events into the session.
async fn drive(
    core: Arc<SessionCore>,
    mut capture: mpsc::Receiver<CaptureEvent>,
    mut connection: mpsc::Receiver<ConnectionEvent>,
    mut transcripts: broadcast::Receiver<TranscriptionEvent>,
    chunks: mpsc::UnboundedSender<parley_voice::AudioChunk>,
) {
    let mut capture_open = true;
    let mut connection_open = true;
    let mut transcripts_open = true;

    loop {
        tokio::select! {
            event = capture.recv(), if capture_open => match event {
                Some(event) => on_capture(&core, event, &chunks).await,
                None => capture_open = false,
            },
            event = connection.recv(), if connection_open => match event {
                Some(event) => on_connection(&core, event).await,
                None => connection_open = false,
            },
            event = transcripts.recv(), if transcripts_open => match event {
                Ok(event) => on_transcription(&core, event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "transcription event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => transcripts_open = false,
            },
            else => break,
        }
    }
    debug!(session_id = %core.machine.session_id(), "session driver finished");
}

async fn on_capture(
    core: &SessionCore,
    event: CaptureEvent,
    chunks: &mpsc::UnboundedSender<parley_voice::AudioChunk>,
) {
    match event {
        CaptureEvent::Chunk(chunk) => {
            if chunks.send(chunk).is_err() {
                debug!("chunk submitter gone, chunk dropped");
            }
        }
        CaptureEvent::SpeechStart => core.emit(SessionEvent::SpeechStarted),
        CaptureEvent::SpeechEnd => core.emit(SessionEvent::SpeechEnded),
        CaptureEvent::Level(level) => core.emit(SessionEvent::Level(level)),
        CaptureEvent::Failed(e) => core.report(e.to_event()).await,
    }
}

async fn on_connection(core: &SessionCore, event: ConnectionEvent) {
    match event {
        ConnectionEvent::IceCandidate(candidate) => {
            core.emit(SessionEvent::IceCandidate(candidate))
        }
        ConnectionEvent::NegotiationNeeded => core.emit(SessionEvent::NegotiationNeeded),
        ConnectionEvent::Quality(sample) => core.emit(SessionEvent::Quality(sample)),
        ConnectionEvent::Failed(e) => core.report(e.to_event()).await,
        ConnectionEvent::IceRestarting => {
            info!(session_id = %core.machine.session_id(), "ice restart in progress");
        }
        other => debug!(session_id = %core.machine.session_id(), event = ?other, "connection event"),
    }
}

/// Successful transcriptions reach observers through
/// [`SessionCore::transcribed`], ahead of the turn they start.
async fn on_transcription(core: &SessionCore, event: TranscriptionEvent) {
    if let TranscriptionEvent::Failed(error) = event {
        core.report(error).await;
    }
}
