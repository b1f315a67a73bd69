//! Reasoning service client and reply extraction.

use crate::config::ServiceConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use parley_types::ConversationTurn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const TOOL_CALL_BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningRequest {
    pub session_id: String,
    pub transcript: String,
    pub history: Vec<ConversationTurn>,
}

/// A tool the reasoning service ran while producing its reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningResponse {
    #[serde(default)]
    pub reply_text: Option<String>,
    #[serde(default)]
    pub tool_executions: Vec<ToolCallRecord>,
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn respond(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, VoiceError>;
}

#[derive(Debug, Clone)]
pub struct HttpReasoningService {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpReasoningService {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self, VoiceError> {
        Self::new(
            config.reasoning_url.clone(),
            config.api_key().map(str::to_string),
            config.request_timeout(),
        )
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    async fn respond(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, VoiceError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| VoiceError::Reasoning(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Reasoning(format!(
                "service returned {}: {}",
                status, detail
            )));
        }

        response
            .json::<ReasoningResponse>()
            .await
            .map_err(|e| VoiceError::Reasoning(format!("invalid response body: {}", e)))
    }
}

/// What the session should do with a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedResponse {
    /// Text to speak, if the service produced any.
    pub reply_text: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Sends transcripts to the reasoning service and publishes the tool calls
/// it reports, independently of whether a reply was produced.
pub struct ResponseProcessor {
    service: Arc<dyn ReasoningService>,
    session_id: String,
    tool_calls: broadcast::Sender<ToolCallRecord>,
}

impl ResponseProcessor {
    pub fn new(service: Arc<dyn ReasoningService>, session_id: impl Into<String>) -> Self {
        let (tool_calls, _) = broadcast::channel(TOOL_CALL_BROADCAST_CAPACITY);
        Self {
            service,
            session_id: session_id.into(),
            tool_calls,
        }
    }

    pub async fn process(
        &self,
        transcript: &str,
        history: &[ConversationTurn],
    ) -> Result<ProcessedResponse, VoiceError> {
        let request = ReasoningRequest {
            session_id: self.session_id.clone(),
            transcript: transcript.to_string(),
            history: history.to_vec(),
        };

        let response = self.service.respond(&request).await.map_err(|e| {
            warn!(session_id = %self.session_id, error = %e, "reasoning request failed");
            e
        })?;

        for call in &response.tool_executions {
            debug!(session_id = %self.session_id, tool = %call.name, status = %call.status, "tool executed");
            let _ = self.tool_calls.send(call.clone());
        }

        let reply_text = response
            .reply_text
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());

        info!(
            session_id = %self.session_id,
            has_reply = reply_text.is_some(),
            tool_calls = response.tool_executions.len(),
            "reply received"
        );

        Ok(ProcessedResponse {
            reply_text,
            tool_calls: response.tool_executions,
        })
    }

    pub fn subscribe_tool_calls(&self) -> broadcast::Receiver<ToolCallRecord> {
        self.tool_calls.subscribe()
    }
}
