//! Session replication over a [`PubSub`] channel.

use crate::auth::SessionAuth;
use crate::error::SyncError;
use crate::pubsub::{ChannelMessage, PresenceRecord, PubSub};
use chrono::{DateTime, Utc};
use parley_types::{ConversationTurn, SessionState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SYNC_EVENT_CAPACITY: usize = 256;

/// Channel topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Turn,
    Transcription,
    FunctionCall,
    StateChange,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Turn => "turn",
            Self::Transcription => "transcription",
            Self::FunctionCall => "function_call",
            Self::StateChange => "state_change",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionPayload {
    pub text: String,
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallPayload {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangePayload {
    pub from: SessionState,
    pub to: SessionState,
}

/// A typed broadcast. Serialized as `{"event": <topic>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum BroadcastEvent {
    Turn(ConversationTurn),
    Transcription(TranscriptionPayload),
    FunctionCall(FunctionCallPayload),
    StateChange(StateChangePayload),
}

impl BroadcastEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::Turn(_) => Topic::Turn,
            Self::Transcription(_) => Topic::Transcription,
            Self::FunctionCall(_) => Topic::FunctionCall,
            Self::StateChange(_) => Topic::StateChange,
        }
    }
}

/// Wire form of a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event: String,
    pub data: Value,
    pub user_id: String,
    pub session_id: String,
    /// Identifies the publishing synchronizer, for self-exclusion.
    pub origin_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    fn wrap(
        event: &BroadcastEvent,
        user_id: &str,
        session_id: &str,
        origin_id: &str,
    ) -> Result<Self, SyncError> {
        let mut tagged = serde_json::to_value(event)?;
        let data = tagged
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok(Self {
            event: event.topic().as_str().to_string(),
            data,
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            origin_id: origin_id.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn decode(&self) -> Result<BroadcastEvent, SyncError> {
        let tagged = serde_json::json!({ "event": self.event, "data": self.data });
        Ok(serde_json::from_value(tagged)?)
    }
}

/// What a listener re-emits locally.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Remote {
        user_id: String,
        session_id: String,
        timestamp: DateTime<Utc>,
        event: BroadcastEvent,
    },
    PresenceJoined(PresenceRecord),
    PresenceLeft {
        user_id: String,
    },
}

struct Joined {
    user_id: String,
    subscription_id: Uuid,
    listener: JoinHandle<()>,
}

pub struct BroadcastSynchronizer {
    pubsub: Arc<dyn PubSub>,
    auth: Arc<dyn SessionAuth>,
    session_id: String,
    channel: String,
    origin_id: String,
    joined: Mutex<Option<Joined>>,
    events: broadcast::Sender<SyncEvent>,
}

impl BroadcastSynchronizer {
    pub fn new(
        pubsub: Arc<dyn PubSub>,
        auth: Arc<dyn SessionAuth>,
        session_id: impl Into<String>,
    ) -> Self {
        let session_id = session_id.into();
        let (events, _) = broadcast::channel(SYNC_EVENT_CAPACITY);
        Self {
            pubsub,
            auth,
            channel: format!("voice-session:{}", session_id),
            session_id,
            origin_id: Uuid::new_v4().to_string(),
            joined: Mutex::new(None),
            events,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    /// Joins the session channel as `user_id`. Calling again once joined is a
    /// no-op.
    pub async fn initialize(&self, user_id: &str) -> Result<(), SyncError> {
        self.auth.verify(user_id)?;

        let mut joined = self.joined.lock().await;
        if joined.is_some() {
            return Ok(());
        }

        let subscription = self.pubsub.subscribe(&self.channel).await?;
        let subscription_id = subscription.id;
        let listener = tokio::spawn(run_listener(
            subscription.receiver,
            self.origin_id.clone(),
            self.events.clone(),
        ));

        if let Err(e) = self
            .pubsub
            .track_presence(
                &self.channel,
                subscription_id,
                PresenceRecord::online(user_id),
            )
            .await
        {
            listener.abort();
            self.pubsub.unsubscribe(&self.channel, subscription_id).await;
            return Err(e);
        }

        info!(
            session_id = %self.session_id,
            user_id = %user_id,
            channel = %self.channel,
            "joined broadcast channel"
        );
        *joined = Some(Joined {
            user_id: user_id.to_string(),
            subscription_id,
            listener,
        });
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.joined.lock().await.is_some()
    }

    pub async fn broadcast_turn(&self, turn: &ConversationTurn) -> bool {
        self.send(BroadcastEvent::Turn(turn.clone())).await
    }

    pub async fn broadcast_transcription(
        &self,
        text: &str,
        is_final: bool,
        confidence: Option<f32>,
    ) -> bool {
        self.send(BroadcastEvent::Transcription(TranscriptionPayload {
            text: text.to_string(),
            is_final,
            confidence,
        }))
        .await
    }

    pub async fn broadcast_function_call(&self, call: FunctionCallPayload) -> bool {
        self.send(BroadcastEvent::FunctionCall(call)).await
    }

    pub async fn broadcast_state_change(&self, from: SessionState, to: SessionState) -> bool {
        self.send(BroadcastEvent::StateChange(StateChangePayload { from, to }))
            .await
    }

    /// Publishes one event. Returns whether it was sent; a drop never
    /// surfaces as an error.
    pub async fn send(&self, event: BroadcastEvent) -> bool {
        let topic = event.topic();
        let user_id = match self.joined.lock().await.as_ref() {
            Some(joined) => joined.user_id.clone(),
            None => {
                debug!(session_id = %self.session_id, %topic, "broadcast dropped: not initialized");
                return false;
            }
        };

        if let Err(e) = self.auth.verify(&user_id) {
            debug!(session_id = %self.session_id, %topic, error = %e, "broadcast dropped: unauthenticated");
            return false;
        }

        let payload = match Envelope::wrap(&event, &user_id, &self.session_id, &self.origin_id)
            .and_then(|envelope| serde_json::to_value(envelope).map_err(SyncError::from))
        {
            Ok(payload) => payload,
            Err(e) => {
                warn!(session_id = %self.session_id, %topic, error = %e, "broadcast dropped: encoding failed");
                return false;
            }
        };

        match self
            .pubsub
            .publish(&self.channel, topic.as_str(), payload)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id = %self.session_id, %topic, error = %e, "broadcast publish failed");
                false
            }
        }
    }

    pub async fn presence(&self) -> Vec<PresenceRecord> {
        self.pubsub.presence(&self.channel).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Leaves the channel and stops the listener. Safe to call repeatedly.
    pub async fn cleanup(&self) {
        let Some(joined) = self.joined.lock().await.take() else {
            return;
        };
        joined.listener.abort();
        self.pubsub
            .unsubscribe(&self.channel, joined.subscription_id)
            .await;
        self.pubsub
            .untrack_presence(&self.channel, joined.subscription_id)
            .await;
        info!(session_id = %self.session_id, "left broadcast channel");
    }
}

impl Drop for BroadcastSynchronizer {
    fn drop(&mut self) {
        if let Ok(mut joined) = self.joined.try_lock() {
            if let Some(joined) = joined.take() {
                joined.listener.abort();
            }
        }
    }
}

async fn run_listener(
    mut receiver: mpsc::Receiver<ChannelMessage>,
    origin_id: String,
    events: broadcast::Sender<SyncEvent>,
) {
    while let Some(message) = receiver.recv().await {
        let event = match message {
            ChannelMessage::Broadcast { event, payload } => {
                let envelope: Envelope = match serde_json::from_value(payload) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(%event, error = %e, "ignoring malformed broadcast");
                        continue;
                    }
                };
                if envelope.origin_id == origin_id {
                    continue;
                }
                match envelope.decode() {
                    Ok(decoded) => SyncEvent::Remote {
                        user_id: envelope.user_id,
                        session_id: envelope.session_id,
                        timestamp: envelope.timestamp,
                        event: decoded,
                    },
                    Err(e) => {
                        warn!(%event, error = %e, "ignoring undecodable broadcast");
                        continue;
                    }
                }
            }
            ChannelMessage::PresenceJoin(record) => SyncEvent::PresenceJoined(record),
            ChannelMessage::PresenceLeave { user_id } => SyncEvent::PresenceLeft { user_id },
        };
        let _ = events.send(event);
    }
}
