//! Peer connection management for the Parley voice engine.
//!
//! Owns one real-time media/data connection per session: negotiation
//! primitives, transport statistics polling, network-quality classification,
//! and a bounded ICE restart policy.
//!
//! The WebRTC stack itself sits behind the [`PeerTransport`] trait. A
//! transport never calls back into engine code; it reports everything it
//! observes as [`TransportEvent`]s on a channel, and the
//! [`PeerConnectionManager`] translates those into typed
//! [`ConnectionEvent`]s for the session.
//!
//! Signaling (how offers, answers and candidates travel between peers) is
//! outside this crate.

pub mod config;
pub mod connection;
pub mod error;
pub mod stats;
pub mod transport;

pub use config::{IceServer, RtcConfig};
pub use connection::{ConnectionEvent, PeerConnectionManager};
pub use error::RtcError;
pub use stats::{ConnectionStats, MediaStats, NetworkQualitySample, QualityMonitor};
pub use transport::{
    CaptureHints, DataChannelInfo, IceCandidate, IceConnectionState, MediaKind,
    PeerConnectionState, PeerTransport, PeerTransportFactory, RemoteTrack, RtcConfiguration,
    SdpType, SessionDescription, StatsReport, TransportEvent,
};
