//! Session and conversation turn records.

use crate::{Role, SessionState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A function/tool invocation requested by the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Outcome of a function/tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResult {
    pub name: String,
    /// Execution status as reported by the tool service (e.g. `"success"`).
    pub status: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

/// One unit of conversation.
///
/// Turns are immutable once appended to a [`Session`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_result: Option<FunctionResult>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ConversationTurn {
    fn base(role: Role) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: None,
            function_call: None,
            function_result: None,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// A user utterance.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::base(Role::User)
        }
    }

    /// An assistant reply.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::base(Role::Assistant)
        }
    }

    /// A function exchange carrying both the call and its result.
    pub fn function(call: FunctionCall, result: FunctionResult) -> Self {
        Self {
            function_call: Some(call),
            function_result: Some(result),
            ..Self::base(Role::Function)
        }
    }

    /// Attaches a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// The conversational context between one user and the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub state: SessionState,
    pub turns: Vec<ConversationTurn>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Identifier of the reasoning model serving this session.
    pub model: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            state: SessionState::Idle,
            turns: Vec::new(),
            created_at: Utc::now(),
            ended_at: None,
            model: model.into(),
        }
    }

    /// Wall-clock duration, up to `ended_at` or now.
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at.unwrap_or_else(Utc::now) - self.created_at
    }
}
