use async_trait::async_trait;
use parley_rtc::{
    IceCandidate, IceConnectionState, PeerTransport, PeerTransportFactory, RtcConfig,
    RtcConfiguration, RtcError, SdpType, SessionDescription, StatsReport, TransportEvent,
};
use parley_session::{BroadcastDeps, EngineConfig, SessionDeps, SessionEvent, VoiceSession};
use parley_sync::{
    BroadcastEvent, BroadcastSynchronizer, LocalPubSub, PresenceRecord, PubSub, SessionAuth,
    Subscription, SyncError, SyncEvent,
};
use parley_types::{ErrorKind, Role, SessionState};
use parley_voice::{
    AudioDevice, AudioPlayer, CaptureConstraints, MediaStream, ReasoningRequest,
    ReasoningResponse, ReasoningService, SynthesisRequest, SynthesisService, SynthesizedAudio,
    ToolCallRecord, TranscriptionRequest, TranscriptionResponse, TranscriptionService, VoiceError,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

// ---- transport ----

#[derive(Default)]
struct MockTransport {
    closes: AtomicUsize,
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn create_offer(&self, _: bool) -> Result<SessionDescription, RtcError> {
        Ok(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0".to_string(),
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, RtcError> {
        Ok(SessionDescription {
            sdp_type: SdpType::Answer,
            sdp: "v=0".to_string(),
        })
    }

    async fn set_local_description(&self, _: SessionDescription) -> Result<(), RtcError> {
        Ok(())
    }

    async fn set_remote_description(&self, _: SessionDescription) -> Result<(), RtcError> {
        Ok(())
    }

    async fn add_ice_candidate(&self, _: IceCandidate) -> Result<(), RtcError> {
        Ok(())
    }

    async fn restart_ice(&self) -> Result<(), RtcError> {
        Ok(())
    }

    async fn stats(&self) -> Result<Vec<StatsReport>, RtcError> {
        Ok(Vec::new())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MockFactory {
    fail: bool,
    transport: Arc<MockTransport>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl MockFactory {
    fn sender(&self) -> mpsc::Sender<TransportEvent> {
        self.events.lock().unwrap().clone().expect("connection created")
    }
}

#[async_trait]
impl PeerTransportFactory for MockFactory {
    async fn create(
        &self,
        _: &RtcConfiguration,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, RtcError> {
        if self.fail {
            return Err(RtcError::Transport("no route to TURN server".to_string()));
        }
        *self.events.lock().unwrap() = Some(events);
        Ok(self.transport.clone())
    }
}

// ---- audio ----

#[derive(Default)]
struct Microphone {
    deny: bool,
    opened: AtomicUsize,
    tracks_stopped: Arc<AtomicUsize>,
}

struct SilentStream {
    recording: bool,
    tracks_stopped: Arc<AtomicUsize>,
}

#[async_trait]
impl MediaStream for SilentStream {
    fn start_recording(&mut self) -> Result<(), VoiceError> {
        self.recording = true;
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<Vec<u8>, VoiceError> {
        self.recording = false;
        Ok(vec![0u8; 4096])
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn analysis_window(&mut self, out: &mut [f32]) -> usize {
        out.fill(0.0);
        out.len()
    }

    fn stop_tracks(&mut self) -> usize {
        self.tracks_stopped.fetch_add(1, Ordering::SeqCst);
        1
    }
}

#[async_trait]
impl AudioDevice for Microphone {
    async fn open(&self, _: &CaptureConstraints) -> Result<Box<dyn MediaStream>, VoiceError> {
        if self.deny {
            return Err(VoiceError::Permission("microphone access denied".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SilentStream {
            recording: false,
            tracks_stopped: self.tracks_stopped.clone(),
        }))
    }
}

#[derive(Default)]
struct Speaker {
    played: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl AudioPlayer for Speaker {
    async fn play(&self, audio: &[u8]) -> Result<(), VoiceError> {
        self.played.lock().unwrap().push(audio.to_vec());
        Ok(())
    }
}

// ---- services ----

/// Returns a fixed transcript for every chunk. Empty by default, so the
/// capture loop's chunks are dropped.
#[derive(Default)]
struct Transcriber {
    text: String,
}

#[async_trait]
impl TranscriptionService for Transcriber {
    async fn transcribe(&self, _: &TranscriptionRequest) -> Result<TranscriptionResponse, VoiceError> {
        Ok(TranscriptionResponse {
            transcript: self.text.clone(),
            confidence: Some(0.9),
        })
    }
}

#[derive(Default)]
struct Reasoner {
    reply: Option<String>,
    tools: Vec<ToolCallRecord>,
    fail: bool,
    requests: Mutex<Vec<ReasoningRequest>>,
}

#[async_trait]
impl ReasoningService for Reasoner {
    async fn respond(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, VoiceError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(VoiceError::Reasoning("upstream returned 502".to_string()));
        }
        Ok(ReasoningResponse {
            reply_text: self.reply.clone(),
            tool_executions: self.tools.clone(),
        })
    }
}

#[derive(Default)]
struct Synthesizer {
    fail: AtomicBool,
}

#[async_trait]
impl SynthesisService for Synthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio, VoiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VoiceError::Synthesis("voice unavailable".to_string()));
        }
        Ok(SynthesizedAudio {
            bytes: request.text.as_bytes().to_vec(),
            service_cache_hit: false,
        })
    }
}

struct AllowAll;

impl SessionAuth for AllowAll {
    fn verify(&self, _: &str) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Local pub/sub whose transcription publishes take a while to land.
#[derive(Default)]
struct SlowTranscriptionPubSub {
    inner: LocalPubSub,
}

#[async_trait]
impl PubSub for SlowTranscriptionPubSub {
    async fn subscribe(&self, channel: &str) -> Result<Subscription, SyncError> {
        self.inner.subscribe(channel).await
    }

    async fn unsubscribe(&self, channel: &str, subscription_id: uuid::Uuid) {
        self.inner.unsubscribe(channel, subscription_id).await
    }

    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<(), SyncError> {
        if event == "transcription" {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.inner.publish(channel, event, payload).await
    }

    async fn track_presence(
        &self,
        channel: &str,
        key: uuid::Uuid,
        record: PresenceRecord,
    ) -> Result<(), SyncError> {
        self.inner.track_presence(channel, key, record).await
    }

    async fn untrack_presence(&self, channel: &str, key: uuid::Uuid) {
        self.inner.untrack_presence(channel, key).await
    }

    async fn presence(&self, channel: &str) -> Vec<PresenceRecord> {
        self.inner.presence(channel).await
    }
}

// ---- harness ----

struct Harness {
    factory: Arc<MockFactory>,
    microphone: Arc<Microphone>,
    speaker: Arc<Speaker>,
    reasoner: Arc<Reasoner>,
    synthesizer: Arc<Synthesizer>,
    transcriber: Arc<Transcriber>,
    broadcast: Option<BroadcastDeps>,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            factory: Arc::new(MockFactory::default()),
            microphone: Arc::new(Microphone::default()),
            speaker: Arc::new(Speaker::default()),
            reasoner: Arc::new(Reasoner {
                reply: Some("It is sunny.".to_string()),
                ..Reasoner::default()
            }),
            synthesizer: Arc::new(Synthesizer::default()),
            transcriber: Arc::new(Transcriber::default()),
            broadcast: None,
        }
    }
}

impl Harness {
    fn session(&self) -> VoiceSession {
        let config = EngineConfig {
            rtc: RtcConfig {
                stats_interval_ms: 3_600_000,
                ..RtcConfig::default()
            },
            ..EngineConfig::default()
        };
        let deps = SessionDeps {
            transport_factory: self.factory.clone(),
            audio_device: self.microphone.clone(),
            audio_player: self.speaker.clone(),
            transcription: self.transcriber.clone(),
            reasoning: self.reasoner.clone(),
            synthesis: self.synthesizer.clone(),
            broadcast: self.broadcast.clone(),
        };
        VoiceSession::new("user-1", &config, deps).unwrap()
    }
}

/// Collects session events up to and including the first one matching
/// `last`.
async fn collect_until(
    rx: &mut broadcast::Receiver<SessionEvent>,
    last: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(SessionEvent::Level(_)) => {}
                Ok(event) => {
                    let done = last(&event);
                    seen.push(event);
                    if done {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("session event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event");
    seen
}

fn entered(state: SessionState) -> impl Fn(&SessionEvent) -> bool {
    move |event: &SessionEvent| matches!(event, SessionEvent::StateChanged(c) if c.to == state)
}

fn returned_to_listening(event: &SessionEvent) -> bool {
    matches!(
        event,
        SessionEvent::StateChanged(c)
            if c.to == SessionState::Listening && c.from != SessionState::Connecting
    )
}

fn transitions(events: &[SessionEvent]) -> Vec<(SessionState, SessionState)> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged(c) => Some((c.from, c.to)),
            _ => None,
        })
        .collect()
}

fn error_kinds(events: &[SessionEvent]) -> Vec<ErrorKind> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Error(error) => Some(error.kind),
            _ => None,
        })
        .collect()
}

// ---- lifecycle ----

#[tokio::test]
async fn start_connects_and_listens() {
    let harness = Harness::default();
    let session = harness.session();
    let mut rx = session.subscribe();

    assert_eq!(session.state(), SessionState::Idle);
    session.start().await.unwrap();
    assert_eq!(session.state(), SessionState::Listening);

    let events = collect_until(&mut rx, entered(SessionState::Listening)).await;
    assert_eq!(
        transitions(&events),
        vec![
            (SessionState::Idle, SessionState::Connecting),
            (SessionState::Connecting, SessionState::Listening),
        ]
    );
    assert_eq!(harness.microphone.opened.load(Ordering::SeqCst), 1);
    assert!(session.connection().is_active());

    session.end().await;
}

#[tokio::test]
async fn second_start_is_rejected() {
    let harness = Harness::default();
    let session = harness.session();
    session.start().await.unwrap();

    let err = session.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    assert_eq!(session.state(), SessionState::Listening);

    session.end().await;
}

#[tokio::test]
async fn denied_microphone_enters_error_and_releases_connection() {
    let harness = Harness {
        microphone: Arc::new(Microphone {
            deny: true,
            ..Microphone::default()
        }),
        ..Harness::default()
    };
    let session = harness.session();
    let mut rx = session.subscribe();

    let err = session.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
    assert_eq!(session.state(), SessionState::Error);

    let events = collect_until(&mut rx, entered(SessionState::Error)).await;
    assert_eq!(error_kinds(&events), vec![ErrorKind::Permission]);
    assert_eq!(harness.factory.transport.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_connection_enters_error_before_capture() {
    let harness = Harness {
        factory: Arc::new(MockFactory {
            fail: true,
            ..MockFactory::default()
        }),
        ..Harness::default()
    };
    let session = harness.session();

    let err = session.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(session.state(), SessionState::Error);
    assert_eq!(harness.microphone.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn end_is_idempotent() {
    let harness = Harness::default();
    let session = harness.session();
    session.start().await.unwrap();
    let mut rx = session.subscribe();

    session.end().await;
    session.end().await;

    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.snapshot().ended_at.is_some());
    assert_eq!(harness.microphone.tracks_stopped.load(Ordering::SeqCst), 1);
    assert_eq!(harness.factory.transport.closes.load(Ordering::SeqCst), 1);

    let events = collect_until(&mut rx, entered(SessionState::Closed)).await;
    assert_eq!(
        transitions(&events),
        vec![(SessionState::Listening, SessionState::Closed)]
    );
}

#[tokio::test]
async fn end_before_start_closes_idle_session() {
    let harness = Harness::default();
    let session = harness.session();
    session.end().await;
    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.start().await.is_err());
}

// ---- conversation ----

#[tokio::test]
async fn full_turn_runs_process_speak_listen() {
    let harness = Harness {
        reasoner: Arc::new(Reasoner {
            reply: Some("It is sunny.".to_string()),
            tools: vec![ToolCallRecord {
                name: "weather".to_string(),
                status: "success".to_string(),
                arguments: json!({"city": "Lisbon"}),
                result: json!({"sky": "clear"}),
            }],
            ..Reasoner::default()
        }),
        ..Harness::default()
    };
    let session = harness.session();
    session.start().await.unwrap();
    let mut rx = session.subscribe();

    session.submit_text("what's the weather").unwrap();
    let events = collect_until(&mut rx, returned_to_listening).await;

    assert_eq!(
        transitions(&events),
        vec![
            (SessionState::Listening, SessionState::Processing),
            (SessionState::Processing, SessionState::Speaking),
            (SessionState::Speaking, SessionState::Listening),
        ]
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::ToolCall(call) if call.name == "weather")));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::Reply(text) if text == "It is sunny.")));

    let roles: Vec<Role> = session.turns().iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Function, Role::Assistant]);
    assert_eq!(
        harness.speaker.played.lock().unwrap().as_slice(),
        &[b"It is sunny.".to_vec()]
    );

    session.end().await;
}

#[tokio::test]
async fn history_excludes_the_current_transcript() {
    let harness = Harness::default();
    let session = harness.session();
    session.start().await.unwrap();
    let mut rx = session.subscribe();

    session.submit_text("first").unwrap();
    collect_until(&mut rx, returned_to_listening).await;
    session.submit_text("second").unwrap();
    collect_until(&mut rx, returned_to_listening).await;

    let requests = harness.reasoner.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].history.is_empty());
    assert_eq!(requests[1].transcript, "second");
    assert_eq!(requests[1].history.len(), 2);
    assert_eq!(requests[1].history[0].content.as_deref(), Some("first"));

    session.end().await;
}

#[tokio::test]
async fn repeated_reply_is_served_from_cache() {
    let harness = Harness::default();
    let session = harness.session();
    session.start().await.unwrap();
    let mut rx = session.subscribe();

    session.submit_text("one").unwrap();
    collect_until(&mut rx, returned_to_listening).await;
    session.submit_text("two").unwrap();
    collect_until(&mut rx, returned_to_listening).await;

    let stats = session.cache_stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(harness.speaker.played.lock().unwrap().len(), 2);

    session.end().await;
}

#[tokio::test]
async fn no_reply_returns_straight_to_listening() {
    let harness = Harness {
        reasoner: Arc::new(Reasoner::default()),
        ..Harness::default()
    };
    let session = harness.session();
    session.start().await.unwrap();
    let mut rx = session.subscribe();

    session.submit_text("never mind").unwrap();
    let events = collect_until(&mut rx, returned_to_listening).await;

    assert_eq!(
        transitions(&events),
        vec![
            (SessionState::Listening, SessionState::Processing),
            (SessionState::Processing, SessionState::Listening),
        ]
    );
    assert!(harness.speaker.played.lock().unwrap().is_empty());

    session.end().await;
}

#[tokio::test]
async fn synthesis_failure_still_returns_to_listening() {
    let harness = Harness::default();
    harness.synthesizer.fail.store(true, Ordering::SeqCst);
    let session = harness.session();
    session.start().await.unwrap();
    let mut rx = session.subscribe();

    session.submit_text("hello").unwrap();
    let events = collect_until(&mut rx, returned_to_listening).await;

    assert_eq!(error_kinds(&events), vec![ErrorKind::Synthesis]);
    assert_eq!(
        transitions(&events).last(),
        Some(&(SessionState::Speaking, SessionState::Listening))
    );
    assert_eq!(session.turns().len(), 2);
    assert!(harness.speaker.played.lock().unwrap().is_empty());

    session.end().await;
}

#[tokio::test]
async fn reasoning_failure_reports_and_returns_to_listening() {
    let harness = Harness {
        reasoner: Arc::new(Reasoner {
            fail: true,
            ..Reasoner::default()
        }),
        ..Harness::default()
    };
    let session = harness.session();
    session.start().await.unwrap();
    let mut rx = session.subscribe();

    session.submit_text("hello").unwrap();
    let events = collect_until(&mut rx, returned_to_listening).await;

    assert_eq!(error_kinds(&events), vec![ErrorKind::Reasoning]);
    assert_eq!(
        transitions(&events),
        vec![
            (SessionState::Listening, SessionState::Processing),
            (SessionState::Processing, SessionState::Listening),
        ]
    );
    assert_eq!(session.turns().len(), 1);

    session.end().await;
}

#[tokio::test]
async fn captured_chunks_become_transcripts_and_turns() {
    let harness = Harness {
        transcriber: Arc::new(Transcriber {
            text: "  turn on the lights ".to_string(),
        }),
        reasoner: Arc::new(Reasoner::default()),
        ..Harness::default()
    };
    let session = harness.session();
    let mut rx = session.subscribe();
    session.start().await.unwrap();

    let events = collect_until(&mut rx, |e| matches!(e, SessionEvent::Transcript(_))).await;
    let Some(SessionEvent::Transcript(transcript)) = events.last() else {
        panic!("expected a transcript event");
    };
    assert_eq!(transcript.text, "turn on the lights");
    assert!(transcript.is_final);

    tokio::time::timeout(Duration::from_secs(10), async {
        while session.turns().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("transcript was never queued");

    let first = session.turns().into_iter().next().expect("user turn");
    assert_eq!(first.role, Role::User);
    assert_eq!(first.content.as_deref(), Some("turn on the lights"));

    session.end().await;
}

#[tokio::test]
async fn transcripts_after_end_are_not_processed() {
    let harness = Harness::default();
    let session = harness.session();
    session.start().await.unwrap();
    session.end().await;

    let _ = session.submit_text("too late");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(session.turns().is_empty());
    assert!(harness.reasoner.requests.lock().unwrap().is_empty());
}

// ---- connection ----

#[tokio::test]
async fn connection_events_are_forwarded() {
    let harness = Harness::default();
    let session = harness.session();
    session.start().await.unwrap();
    let mut rx = session.subscribe();

    let candidate = IceCandidate {
        candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
    };
    let sender = harness.factory.sender();
    sender
        .send(TransportEvent::IceCandidate(candidate.clone()))
        .await
        .unwrap();
    sender.send(TransportEvent::NegotiationNeeded).await.unwrap();

    let events = collect_until(&mut rx, |e| matches!(e, SessionEvent::NegotiationNeeded)).await;
    assert!(events.contains(&SessionEvent::IceCandidate(candidate)));

    session.end().await;
}

#[tokio::test]
async fn ice_failure_after_restart_enters_error() {
    let harness = Harness::default();
    let session = harness.session();
    session.start().await.unwrap();
    let mut rx = session.subscribe();

    let sender = harness.factory.sender();
    for _ in 0..2 {
        sender
            .send(TransportEvent::IceConnectionState(IceConnectionState::Failed))
            .await
            .unwrap();
    }

    let events = collect_until(&mut rx, entered(SessionState::Error)).await;
    assert_eq!(error_kinds(&events), vec![ErrorKind::Connection]);
    assert_eq!(session.state(), SessionState::Error);

    session.end().await;
    assert_eq!(session.state(), SessionState::Closed);
}

// ---- replication ----

#[tokio::test]
async fn observers_receive_turns_and_state_changes() {
    let pubsub: Arc<dyn PubSub> = Arc::new(LocalPubSub::new());
    let harness = Harness {
        broadcast: Some(BroadcastDeps {
            pubsub: pubsub.clone(),
            auth: Arc::new(AllowAll),
        }),
        ..Harness::default()
    };
    let session = harness.session();

    let observer = BroadcastSynchronizer::new(pubsub, Arc::new(AllowAll), session.session_id());
    let mut remote = observer.subscribe();
    observer.initialize("observer").await.unwrap();

    session.start().await.unwrap();
    session.submit_text("hello").unwrap();

    let mut saw_processing = false;
    let assistant = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match remote.recv().await {
                Ok(SyncEvent::Remote { user_id, event, .. }) => {
                    assert_eq!(user_id, "user-1");
                    match event {
                        BroadcastEvent::StateChange(change)
                            if change.to == SessionState::Processing =>
                        {
                            saw_processing = true
                        }
                        BroadcastEvent::Turn(turn) if turn.role == Role::Assistant => {
                            return turn
                        }
                        _ => {}
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("observer stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for replicated reply");

    assert!(saw_processing);
    assert_eq!(assistant.content.as_deref(), Some("It is sunny."));
    assert_eq!(session.presence().await.len(), 2);

    session.end().await;
    assert_eq!(observer.presence().await.len(), 1);
    observer.cleanup().await;
}

#[tokio::test]
async fn observers_hear_the_transcription_before_the_turn_it_starts() {
    let pubsub: Arc<dyn PubSub> = Arc::new(SlowTranscriptionPubSub::default());
    let harness = Harness {
        transcriber: Arc::new(Transcriber {
            text: "lights on".to_string(),
        }),
        reasoner: Arc::new(Reasoner::default()),
        broadcast: Some(BroadcastDeps {
            pubsub: pubsub.clone(),
            auth: Arc::new(AllowAll),
        }),
        ..Harness::default()
    };
    let session = harness.session();

    let observer = BroadcastSynchronizer::new(pubsub, Arc::new(AllowAll), session.session_id());
    let mut remote = observer.subscribe();
    observer.initialize("observer").await.unwrap();

    session.start().await.unwrap();

    let order = tokio::time::timeout(Duration::from_secs(10), async {
        let mut order = Vec::new();
        loop {
            match remote.recv().await {
                Ok(SyncEvent::Remote { event, .. }) => match event {
                    BroadcastEvent::Transcription(payload) => {
                        assert_eq!(payload.text, "lights on");
                        order.push("transcription");
                    }
                    BroadcastEvent::Turn(turn) if turn.role == Role::User => {
                        order.push("turn");
                        return order;
                    }
                    _ => {}
                },
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("observer stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for the replicated user turn");
    assert_eq!(order, vec!["transcription", "turn"]);

    session.end().await;
    observer.cleanup().await;
}
