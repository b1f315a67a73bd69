//! The authoritative session state.

use crate::error::SessionError;
use chrono::{DateTime, Utc};
use parley_types::{ConversationTurn, Session, SessionState};
use serde::Serialize;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

const STATE_BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub from: SessionState,
    pub to: SessionState,
    pub at: DateTime<Utc>,
}

/// Whether `from -> to` is a legal transition. Self-transitions are handled
/// by the caller.
pub fn is_allowed(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;

    if from == Closed {
        return false;
    }
    if matches!(to, Error | Closed) {
        return true;
    }
    match from {
        Idle => to == Connecting,
        Connecting => matches!(to, Listening | Processing | Speaking | Idle),
        Listening | Processing | Speaking => matches!(to, Listening | Processing | Speaking | Idle),
        Error => to == Idle,
        Closed => false,
    }
}

/// Owns the [`Session`] record. Every status change goes through
/// [`SessionStateMachine::request`].
pub struct SessionStateMachine {
    session: RwLock<Session>,
    changes: broadcast::Sender<StateChange>,
}

impl SessionStateMachine {
    pub fn new(session: Session) -> Self {
        let (changes, _) = broadcast::channel(STATE_BROADCAST_CAPACITY);
        Self {
            session: RwLock::new(session),
            changes,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.read().state
    }

    pub fn session_id(&self) -> String {
        self.read().id.clone()
    }

    pub fn user_id(&self) -> String {
        self.read().user_id.clone()
    }

    /// Applies a transition.
    ///
    /// Returns `Ok(None)` when already in `to`; nothing is emitted then.
    pub fn request(&self, to: SessionState) -> Result<Option<StateChange>, SessionError> {
        let mut session = self.write();
        let from = session.state;

        if from == to {
            return Ok(None);
        }
        if !is_allowed(from, to) {
            debug!(session_id = %session.id, %from, %to, "transition rejected");
            return Err(SessionError::InvalidTransition { from, to });
        }

        let at = Utc::now();
        session.state = to;
        if to == SessionState::Closed {
            session.ended_at = Some(at);
        }

        let change = StateChange { from, to, at };
        // Sent under the lock so subscribers observe changes in applied order.
        let _ = self.changes.send(change.clone());
        info!(session_id = %session.id, %from, %to, "session state changed");
        Ok(Some(change))
    }

    /// Appends a turn. Turns cannot be added to a closed session.
    pub fn append_turn(&self, turn: ConversationTurn) -> Result<(), SessionError> {
        let mut session = self.write();
        if session.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        session.turns.push(turn);
        Ok(())
    }

    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.read().turns.clone()
    }

    pub fn turn_count(&self) -> usize {
        self.read().turns.len()
    }

    pub fn snapshot(&self) -> Session {
        self.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }
}
