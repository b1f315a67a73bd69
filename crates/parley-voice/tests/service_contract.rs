//! HTTP contract tests for the transcription, synthesis and reasoning
//! clients.

use parley_types::voice::SynthesisModel;
use parley_types::ConversationTurn;
use parley_voice::{
    HttpReasoningService, HttpSynthesisService, HttpTranscriptionService, ReasoningRequest,
    ReasoningService, SynthesisRequest, SynthesisService, TranscriptionRequest,
    TranscriptionService, VoiceError,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn transcription_request(audio: Vec<u8>) -> TranscriptionRequest {
    TranscriptionRequest {
        session_id: "session-1".to_string(),
        audio,
        language: "en".to_string(),
    }
}

#[tokio::test]
async fn transcription_sends_base64_audio_and_parses_transcript() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transcribe"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "sessionId": "session-1",
            "audio": "AQID",
            "language": "en"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"transcript": "hello there", "confidence": 0.9})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let service = HttpTranscriptionService::new(
        format!("{}/transcribe", server.uri()),
        Some("test-key".to_string()),
        TIMEOUT,
    )
    .unwrap();

    let response = service
        .transcribe(&transcription_request(vec![1, 2, 3]))
        .await
        .unwrap();
    assert_eq!(response.transcript, "hello there");
    assert_eq!(response.confidence, Some(0.9));
}

#[tokio::test]
async fn transcription_maps_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let service = HttpTranscriptionService::new(server.uri(), None, TIMEOUT).unwrap();
    let err = service
        .transcribe(&transcription_request(vec![0; 16]))
        .await
        .unwrap_err();

    match err {
        VoiceError::Transcription(msg) => {
            assert!(msg.contains("503"), "{}", msg);
            assert!(msg.contains("overloaded"), "{}", msg);
        }
        other => panic!("expected transcription error, got {:?}", other),
    }
}

#[tokio::test]
async fn transcription_rejects_oversized_audio_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"transcript": ""})))
        .expect(0)
        .mount(&server)
        .await;

    let service = HttpTranscriptionService::new(server.uri(), None, TIMEOUT).unwrap();
    let oversized = vec![0u8; parley_voice::stt::MAX_STT_INPUT_BYTES + 1];
    let err = service
        .transcribe(&transcription_request(oversized))
        .await
        .unwrap_err();
    assert!(matches!(err, VoiceError::Transcription(msg) if msg.contains("maximum size")));
}

#[tokio::test]
async fn synthesis_returns_audio_and_reports_service_cache_hit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/synthesize"))
        .and(body_partial_json(json!({
            "text": "hi",
            "voiceId": "alice",
            "model": "turbo_v2_5"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-cache", "HIT")
                .set_body_bytes(vec![7u8, 8, 9]),
        )
        .expect(1)
        .mount(&server)
        .await;

    let service =
        HttpSynthesisService::new(format!("{}/synthesize", server.uri()), None, TIMEOUT).unwrap();
    let audio = service
        .synthesize(&SynthesisRequest {
            text: "hi".to_string(),
            voice_id: "alice".to_string(),
            model: SynthesisModel::Turbo,
        })
        .await
        .unwrap();

    assert_eq!(audio.bytes, vec![7, 8, 9]);
    assert!(audio.service_cache_hit);
}

#[tokio::test]
async fn synthesis_treats_empty_body_as_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let service = HttpSynthesisService::new(server.uri(), None, TIMEOUT).unwrap();
    let err = service
        .synthesize(&SynthesisRequest {
            text: "hi".to_string(),
            voice_id: "alice".to_string(),
            model: SynthesisModel::Flash,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, VoiceError::Synthesis(_)));
}

#[tokio::test]
async fn reasoning_sends_history_and_parses_tool_executions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/respond"))
        .and(body_partial_json(json!({
            "sessionId": "session-1",
            "transcript": "what's the weather",
            "history": [{"role": "user", "content": "hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "replyText": "It is sunny.",
            "toolExecutions": [
                {"name": "weather", "status": "ok", "arguments": {"city": "Oslo"}, "result": {"sky": "clear"}}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let service =
        HttpReasoningService::new(format!("{}/respond", server.uri()), None, TIMEOUT).unwrap();
    let response = service
        .respond(&ReasoningRequest {
            session_id: "session-1".to_string(),
            transcript: "what's the weather".to_string(),
            history: vec![ConversationTurn::user("hello")],
        })
        .await
        .unwrap();

    assert_eq!(response.reply_text.as_deref(), Some("It is sunny."));
    assert_eq!(response.tool_executions.len(), 1);
    assert_eq!(response.tool_executions[0].name, "weather");
    assert_eq!(response.tool_executions[0].arguments, json!({"city": "Oslo"}));
}

#[tokio::test]
async fn reasoning_accepts_reply_without_tools() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"replyText": "ok"})))
        .mount(&server)
        .await;

    let service = HttpReasoningService::new(server.uri(), None, TIMEOUT).unwrap();
    let response = service
        .respond(&ReasoningRequest {
            session_id: "s".to_string(),
            transcript: "t".to_string(),
            history: Vec::new(),
        })
        .await
        .unwrap();
    assert!(response.tool_executions.is_empty());
}
