//! The seam between the engine and a concrete WebRTC stack.

use crate::config::IceServer;
use crate::error::RtcError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// A session description exchanged over the (external) signaling channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Inbound media track announced by the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: MediaKind,
    pub stream_id: String,
}

/// Inbound data channel opened by the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChannelInfo {
    pub label: String,
    pub id: Option<u16>,
}

/// Everything a transport observes, reported on its event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    IceCandidate(IceCandidate),
    Track(RemoteTrack),
    ConnectionState(PeerConnectionState),
    IceConnectionState(IceConnectionState),
    DataChannel(DataChannelInfo),
    NegotiationNeeded,
}

/// One raw statistics record, mirroring the WebRTC stats report types the
/// engine aggregates.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsReport {
    InboundRtp {
        kind: MediaKind,
        bytes_received: u64,
        packets_received: u64,
        /// May be negative when duplicates arrive.
        packets_lost: i64,
        jitter_secs: f64,
    },
    OutboundRtp {
        kind: MediaKind,
        bytes_sent: u64,
        packets_sent: u64,
    },
    CandidatePair {
        nominated: bool,
        current_round_trip_time_secs: Option<f64>,
    },
}

/// Capture processing hints applied at the transport layer.
///
/// All disabled by default: echo cancellation, noise suppression and gain
/// control belong to the audio capture engine, not the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaptureHints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

/// Parameters handed to a [`PeerTransportFactory`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RtcConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub capture_hints: CaptureHints,
}

/// A live WebRTC peer connection.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, RtcError>;
    async fn create_answer(&self) -> Result<SessionDescription, RtcError>;
    async fn set_local_description(&self, description: SessionDescription)
        -> Result<(), RtcError>;
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), RtcError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), RtcError>;
    /// Starts gathering fresh ICE credentials on the existing connection.
    async fn restart_ice(&self) -> Result<(), RtcError>;
    async fn stats(&self) -> Result<Vec<StatsReport>, RtcError>;
    /// Releases every transport resource. Must tolerate repeated calls.
    async fn close(&self);
}

/// Builds transports. The factory wires the transport's observations to
/// `events`; nothing is delivered through callbacks.
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(
        &self,
        configuration: &RtcConfiguration,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, RtcError>;
}
