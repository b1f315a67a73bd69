//! Multi-observer replication for Parley voice sessions.
//!
//! A [`BroadcastSynchronizer`] publishes a session's turns, transcriptions,
//! tool calls and state changes to a pub/sub channel scoped to the session,
//! and re-emits what other observers publish as local [`SyncEvent`]s. Every
//! send is gated on a [`SessionAuth`] check; sends that fail it are dropped.

pub mod auth;
pub mod error;
pub mod pubsub;
pub mod synchronizer;

pub use auth::{generate_session_token, verify_session_token, SessionAuth, TokenAuth};
pub use error::SyncError;
pub use pubsub::{
    ChannelMessage, LocalPubSub, PresenceRecord, PresenceStatus, PubSub, Subscription,
};
pub use synchronizer::{
    BroadcastEvent, BroadcastSynchronizer, Envelope, FunctionCallPayload, StateChangePayload,
    SyncEvent, Topic, TranscriptionPayload,
};
