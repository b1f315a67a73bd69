//! Pub/sub channel primitives.

use crate::error::SyncError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use uuid::Uuid;

/// Per-subscriber buffer. A subscriber this far behind loses messages.
const SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: String,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}

impl PresenceRecord {
    pub fn online(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            status: PresenceStatus::Online,
            last_seen: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Broadcast { event: String, payload: Value },
    PresenceJoin(PresenceRecord),
    PresenceLeave { user_id: String },
}

#[derive(Debug)]
pub struct Subscription {
    pub id: Uuid,
    pub channel: String,
    pub receiver: mpsc::Receiver<ChannelMessage>,
}

#[async_trait]
pub trait PubSub: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<Subscription, SyncError>;

    async fn unsubscribe(&self, channel: &str, subscription_id: Uuid);

    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<(), SyncError>;

    /// Adds or refreshes the presence held under `key`.
    ///
    /// One user may hold several keys at once (one per join). The channel
    /// hears a join only when the user's first key is tracked.
    async fn track_presence(
        &self,
        channel: &str,
        key: Uuid,
        record: PresenceRecord,
    ) -> Result<(), SyncError>;

    /// Drops the presence held under `key`. The channel hears a leave only
    /// when the user's last key goes.
    async fn untrack_presence(&self, channel: &str, key: Uuid);

    /// One record per present user, the most recently seen one.
    async fn presence(&self, channel: &str) -> Vec<PresenceRecord>;
}

type SubscriberMap = HashMap<String, HashMap<Uuid, mpsc::Sender<ChannelMessage>>>;
type PresenceMap = HashMap<String, HashMap<Uuid, PresenceRecord>>;

/// In-process [`PubSub`]. Every subscriber of a channel, including the
/// publisher's own subscription, receives each message in publish order.
#[derive(Default)]
pub struct LocalPubSub {
    subscribers: RwLock<SubscriberMap>,
    presence: RwLock<PresenceMap>,
}

impl LocalPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(channel)
            .map_or(0, HashMap::len)
    }

    async fn deliver(&self, channel: &str, message: ChannelMessage) {
        let subscribers = self.subscribers.read().await;
        let Some(listeners) = subscribers.get(channel) else {
            return;
        };
        for (id, sender) in listeners {
            if let Err(e) = sender.try_send(message.clone()) {
                warn!(
                    subscription_id = %id,
                    channel = %channel,
                    "dropping channel message for slow subscriber: {}",
                    e
                );
            }
        }
    }
}

#[async_trait]
impl PubSub for LocalPubSub {
    async fn subscribe(&self, channel: &str) -> Result<Subscription, SyncError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = Uuid::new_v4();
        self.subscribers
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .insert(id, tx);
        Ok(Subscription {
            id,
            channel: channel.to_string(),
            receiver: rx,
        })
    }

    async fn unsubscribe(&self, channel: &str, subscription_id: Uuid) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(listeners) = subscribers.get_mut(channel) {
            listeners.remove(&subscription_id);
            if listeners.is_empty() {
                subscribers.remove(channel);
            }
        }
    }

    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<(), SyncError> {
        self.deliver(
            channel,
            ChannelMessage::Broadcast {
                event: event.to_string(),
                payload,
            },
        )
        .await;
        Ok(())
    }

    async fn track_presence(
        &self,
        channel: &str,
        key: Uuid,
        record: PresenceRecord,
    ) -> Result<(), SyncError> {
        let first = {
            let mut presence = self.presence.write().await;
            let joins = presence.entry(channel.to_string()).or_default();
            let first = !joins
                .iter()
                .any(|(k, r)| *k != key && r.user_id == record.user_id);
            joins.insert(key, record.clone());
            first
        };
        if first {
            self.deliver(channel, ChannelMessage::PresenceJoin(record))
                .await;
        }
        Ok(())
    }

    async fn untrack_presence(&self, channel: &str, key: Uuid) {
        let left = {
            let mut presence = self.presence.write().await;
            let Some(joins) = presence.get_mut(channel) else {
                return;
            };
            let Some(removed) = joins.remove(&key) else {
                return;
            };
            let still_present = joins.values().any(|r| r.user_id == removed.user_id);
            if joins.is_empty() {
                presence.remove(channel);
            }
            (!still_present).then_some(removed.user_id)
        };
        if let Some(user_id) = left {
            self.deliver(channel, ChannelMessage::PresenceLeave { user_id })
                .await;
        }
    }

    async fn presence(&self, channel: &str) -> Vec<PresenceRecord> {
        let presence = self.presence.read().await;
        let mut latest: HashMap<&str, &PresenceRecord> = HashMap::new();
        for record in presence.get(channel).into_iter().flat_map(HashMap::values) {
            let newer = latest
                .get(record.user_id.as_str())
                .map_or(true, |seen| record.last_seen > seen.last_seen);
            if newer {
                latest.insert(record.user_id.as_str(), record);
            }
        }
        let mut records: Vec<PresenceRecord> = latest.into_values().cloned().collect();
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        records
    }
}
