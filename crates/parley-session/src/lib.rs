//! Session orchestration for the Parley voice engine.
//!
//! [`VoiceSession`] is the composition root. It owns one instance of every
//! per-session component and wires them together:
//!
//! ```text
//! capture ──chunks──▶ pipeline ──FIFO──▶ reply cycle ──▶ speech
//!    │                    │                   │
//!    └──── VAD / level ───┴─── transcripts ───┴──▶ SessionEvent stream
//!                                             └──▶ BroadcastSynchronizer
//! peer connection ──quality / failure──────────────▶ SessionEvent stream
//! ```
//!
//! Session status lives only in the [`SessionStateMachine`]. Components ask
//! it for transitions; it validates, applies, and reports them.

pub mod config;
pub mod error;
pub mod event;
pub mod session;
pub mod state;
pub mod telemetry;

pub use config::{load_config, ConfigError, EngineConfig, LoggingConfig, SyncConfig};
pub use error::SessionError;
pub use event::SessionEvent;
pub use session::{BroadcastDeps, SessionDeps, VoiceSession};
pub use state::{SessionStateMachine, StateChange};
pub use telemetry::init_tracing;
