//! `OpenAiInstructLm` against a mock chat completions endpoint.

use httpmock::Method::POST;
use httpmock::MockServer;
use serde_json::json;
use sr_olthad::io::config::OpenAiConfig;
use sr_olthad::io::lm::{ChatMessage, InstructLm, LmError, OpenAiInstructLm, StreamSink};
use sr_olthad::test_support::RecordingStreams;

fn config(server: &MockServer) -> OpenAiConfig {
    OpenAiConfig {
        api_base: server.base_url(),
        api_key: Some("test-key".to_string()),
        ..OpenAiConfig::default()
    }
}

fn messages() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are a planner."),
        ChatMessage::user("Plan lunch."),
    ]
}

#[tokio::test]
async fn completion_returns_first_choice_content() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer test-key")
                .json_body_partial(r#"{"model": "gpt-test", "stream": false}"#);
            then.status(200).json_body(json!({
                "choices": [{"message": {"role": "assistant", "content": "Eat pizza."}}]
            }));
        })
        .await;
    let lm = OpenAiInstructLm::new(&config(&server), "gpt-test").expect("client");

    let reply = lm.generate(&messages(), None).await.expect("generate");

    assert_eq!(reply, "Eat pizza.");
    mock.assert_async().await;
}

#[tokio::test]
async fn streamed_deltas_reach_the_handler_and_are_concatenated() {
    let server = MockServer::start_async().await;
    let body = [
        r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"Eat "}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"pizza."}}]}"#,
        "data: [DONE]",
    ]
    .join("\n\n");
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .json_body_partial(r#"{"stream": true}"#);
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(body);
        })
        .await;
    let lm = OpenAiInstructLm::new(&config(&server), "gpt-test").expect("client");
    let streams = RecordingStreams::default();

    let reply = lm
        .generate(&messages(), Some(StreamSink::new(&streams, Some(2))))
        .await
        .expect("generate");

    assert_eq!(reply, "Eat pizza.");
    assert_eq!(streams.text_of(Some(2)), "Eat pizza.");
    assert_eq!(streams.stream_indices(), vec![Some(2), Some(2)]);
    mock.assert_async().await;
}

#[tokio::test]
async fn error_status_is_reported_with_body() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(429).body("slow down");
        })
        .await;
    let lm = OpenAiInstructLm::new(&config(&server), "gpt-test").expect("client");

    let err = lm.generate(&messages(), None).await.unwrap_err();

    assert!(matches!(
        err,
        LmError::Status { status: 429, ref body } if body == "slow down"
    ));
}

#[tokio::test]
async fn completion_without_content_is_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({"choices": []}));
        })
        .await;
    let lm = OpenAiInstructLm::new(&config(&server), "gpt-test").expect("client");

    let err = lm.generate(&messages(), None).await.unwrap_err();

    assert!(matches!(err, LmError::Malformed(_)));
}
