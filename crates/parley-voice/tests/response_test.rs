use async_trait::async_trait;
use parley_types::ConversationTurn;
use parley_voice::{
    ReasoningRequest, ReasoningResponse, ReasoningService, ResponseProcessor, ToolCallRecord,
    VoiceError,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

struct FixedReasoner {
    response: Result<ReasoningResponse, VoiceError>,
    seen: Mutex<Vec<ReasoningRequest>>,
}

impl FixedReasoner {
    fn new(response: Result<ReasoningResponse, VoiceError>) -> Arc<Self> {
        Arc::new(Self {
            response,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ReasoningService for FixedReasoner {
    async fn respond(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, VoiceError> {
        self.seen.lock().unwrap().push(request.clone());
        self.response.clone()
    }
}

fn tool(name: &str) -> ToolCallRecord {
    ToolCallRecord {
        name: name.to_string(),
        status: "ok".to_string(),
        arguments: json!({}),
        result: json!({"done": true}),
    }
}

#[tokio::test]
async fn reply_and_tool_calls_are_returned_and_published() {
    let reasoner = FixedReasoner::new(Ok(ReasoningResponse {
        reply_text: Some(" Booked it. ".to_string()),
        tool_executions: vec![tool("calendar"), tool("email")],
    }));
    let processor = ResponseProcessor::new(reasoner.clone(), "session-1");
    let mut tools = processor.subscribe_tool_calls();

    let history = vec![ConversationTurn::user("book a meeting")];
    let processed = processor.process("book a meeting", &history).await.unwrap();

    assert_eq!(processed.reply_text.as_deref(), Some("Booked it."));
    assert_eq!(processed.tool_calls.len(), 2);
    assert_eq!(tools.try_recv().unwrap().name, "calendar");
    assert_eq!(tools.try_recv().unwrap().name, "email");

    let seen = reasoner.seen.lock().unwrap();
    assert_eq!(seen[0].session_id, "session-1");
    assert_eq!(seen[0].history.len(), 1);
}

#[tokio::test]
async fn tool_calls_are_published_even_without_reply() {
    let reasoner = FixedReasoner::new(Ok(ReasoningResponse {
        reply_text: Some("   ".to_string()),
        tool_executions: vec![tool("lights")],
    }));
    let processor = ResponseProcessor::new(reasoner, "session-1");
    let mut tools = processor.subscribe_tool_calls();

    let processed = processor.process("lights off", &[]).await.unwrap();

    assert_eq!(processed.reply_text, None);
    assert_eq!(tools.try_recv().unwrap().name, "lights");
}

#[tokio::test]
async fn service_failure_propagates() {
    let reasoner = FixedReasoner::new(Err(VoiceError::Reasoning("503".into())));
    let processor = ResponseProcessor::new(reasoner, "session-1");
    let err = processor.process("hello", &[]).await.unwrap_err();
    assert!(matches!(err, VoiceError::Reasoning(_)));
}
