// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatline::llm::providers::openai_compat::GROQ;
use chatline::llm::providers::{
    AnthropicProvider, LocalModelConfig, LocalModelHandle, LocalProvider, OpenAiCompatProvider,
};
use chatline::llm::{
    CompletionProvider, CompletionRequest, Fragment, FragmentStream, Message, ModelOverrides,
    Usage,
};
use chatline::ChatlineError;

async fn drain(stream: FragmentStream) -> (Vec<String>, Option<Usage>, Option<ChatlineError>) {
    let mut texts = Vec::new();
    let mut usage = None;
    let mut error = None;
    let mut stream = stream;
    while let Some(fragment) = stream.next().await {
        match fragment {
            Ok(Fragment::Text(text)) => texts.push(text),
            Ok(Fragment::Usage(u)) => usage = Some(u),
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }
    (texts, usage, error)
}

fn sse(events: &[(&str, serde_json::Value)]) -> String {
    events
        .iter()
        .map(|(kind, data)| format!("event: {}\ndata: {}\n\n", kind, data))
        .collect()
}

fn data_lines(chunks: &[&str]) -> String {
    chunks.iter().map(|c| format!("data: {}\n\n", c)).collect()
}

fn transcript() -> Vec<Message> {
    vec![Message::system("You are terse."), Message::user("2+2?")]
}

// ==================== Anthropic ====================

fn anthropic(server: &MockServer) -> AnthropicProvider {
    AnthropicProvider::with_base_url("sk-test", format!("{}/v1/messages", server.uri()))
}

#[tokio::test]
async fn test_anthropic_streaming_text_and_usage() {
    let server = MockServer::start().await;
    let body = sse(&[
        (
            "message_start",
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 12, "output_tokens": 1}}}),
        ),
        ("ping", json!({"type": "ping"})),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "He"}}),
        ),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "llo"}}),
        ),
        (
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 5}}),
        ),
        ("message_stop", json!({"type": "message_stop"})),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "system": "You are terse.",
            "messages": [{"role": "user", "content": "2+2?"}],
            "stream": true,
            "stop_sequences": ["\n\nHuman:"],
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let stream = anthropic(&server)
        .complete(CompletionRequest::new(transcript()).with_stream(true))
        .await
        .unwrap();
    let (texts, usage, error) = drain(stream).await;

    assert!(error.is_none());
    assert_eq!(texts, vec!["He", "llo"]);
    assert_eq!(usage, Some(Usage::new(12, 5)));
}

#[tokio::test]
async fn test_anthropic_non_streaming_single_fragment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "content": [{"type": "text", "text": "4"}],
            "usage": {"input_tokens": 9, "output_tokens": 1}
        })))
        .mount(&server)
        .await;

    let stream = anthropic(&server)
        .complete(CompletionRequest::new(transcript()))
        .await
        .unwrap();
    let (texts, usage, error) = drain(stream).await;

    assert!(error.is_none());
    assert_eq!(texts, vec!["4"]);
    assert_eq!(usage, Some(Usage::new(9, 1)));
}

#[tokio::test]
async fn test_anthropic_tool_use_block_normalized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"city": "Rome"}}
            ],
            "usage": {"input_tokens": 9, "output_tokens": 3}
        })))
        .mount(&server)
        .await;

    let stream = anthropic(&server)
        .complete(CompletionRequest::new(transcript()))
        .await
        .unwrap();
    let (texts, _, _) = drain(stream).await;

    assert_eq!(texts.len(), 1);
    let parsed: serde_json::Value = serde_json::from_str(&texts[0]).unwrap();
    assert_eq!(
        parsed,
        json!([{"tool_call": "lookup", "arguments": {"city": "Rome"}}])
    );
}

#[tokio::test]
async fn test_anthropic_status_mapping() {
    let cases = [
        (400, "bad request"),
        (401, "invalid x-api-key"),
        (529, "overloaded"),
    ];
    for (status, message) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "type": "error",
                "error": {"type": "x", "message": message}
            })))
            .mount(&server)
            .await;

        let err = anthropic(&server)
            .complete(CompletionRequest::new(transcript()))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains(message), "{}: {}", status, err);
        match status {
            400 => assert!(matches!(err, ChatlineError::BadRequest(_))),
            401 => assert!(matches!(err, ChatlineError::Configuration(_))),
            _ => assert!(matches!(err, ChatlineError::Completion(_))),
        }
    }
}

#[tokio::test]
async fn test_anthropic_stream_error_event_after_text() {
    let server = MockServer::start().await;
    let body = sse(&[
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}}),
        ),
        (
            "error",
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        ),
    ]);
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let stream = anthropic(&server)
        .complete(CompletionRequest::new(transcript()).with_stream(true))
        .await
        .unwrap();
    let (texts, _, error) = drain(stream).await;

    assert_eq!(texts, vec!["Hel"]);
    assert!(matches!(error, Some(ChatlineError::Completion(m)) if m.contains("Overloaded")));
}

#[tokio::test]
async fn test_anthropic_truncated_stream_is_completion_error() {
    let server = MockServer::start().await;
    let body = sse(&[
        (
            "message_start",
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 12, "output_tokens": 1}}}),
        ),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}}),
        ),
    ]);
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let stream = anthropic(&server)
        .complete(CompletionRequest::new(transcript()).with_stream(true))
        .await
        .unwrap();
    let (texts, usage, error) = drain(stream).await;

    assert_eq!(texts, vec!["Hel"]);
    assert!(usage.is_none());
    assert!(matches!(error, Some(ChatlineError::Completion(m)) if m.contains("message_stop")));
}

#[tokio::test]
async fn test_empty_transcript_fails_before_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = anthropic(&server)
        .complete(CompletionRequest::new(vec![]))
        .await
        .err()
        .unwrap();
    assert!(err.is_bad_request());
}

// ==================== OpenAI-compatible ====================

fn groq(server: &MockServer) -> OpenAiCompatProvider {
    OpenAiCompatProvider::from_preset(GROQ, "gsk-test").with_base_url(server.uri())
}

#[tokio::test]
async fn test_openai_compat_streaming() {
    let server = MockServer::start().await;
    let body = data_lines(&[
        r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":""},"finish_reason":null}]}"#,
        r#"{"choices":[{"index":0,"delta":{"content":"He"},"finish_reason":null}]}"#,
        r#"{"choices":[{"index":0,"delta":{"content":"llo"},"finish_reason":null}]}"#,
        r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"x_groq":{"usage":{"prompt_tokens":20,"completion_tokens":2,"total_tokens":22}}}"#,
        "[DONE]",
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer gsk-test"))
        .and(body_partial_json(json!({
            "model": "llama3-70b-8192",
            "messages": [
                {"role": "system", "content": "You are terse."},
                {"role": "user", "content": "2+2?"}
            ],
            "stream": true,
            "temperature": 0.5
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = CompletionRequest::new(transcript())
        .with_stream(true)
        .with_overrides(ModelOverrides::new().with("temperature", 0.5));
    let (texts, usage, error) = drain(groq(&server).complete(request).await.unwrap()).await;

    assert!(error.is_none());
    assert_eq!(texts, vec!["He", "llo"]);
    assert_eq!(usage, Some(Usage::new(20, 2)));
}

#[tokio::test]
async fn test_openai_compat_text_on_finish_chunk_is_kept() {
    let server = MockServer::start().await;
    let body = data_lines(&[
        r#"{"choices":[{"index":0,"delta":{"content":"The answer"},"finish_reason":null}]}"#,
        r#"{"choices":[{"index":0,"delta":{"content":" is 4."},"finish_reason":"stop"}]}"#,
        "[DONE]",
    ]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let request = CompletionRequest::new(transcript()).with_stream(true);
    let (texts, _, error) = drain(groq(&server).complete(request).await.unwrap()).await;

    assert!(error.is_none());
    assert_eq!(texts.concat(), "The answer is 4.");
}

#[tokio::test]
async fn test_openai_compat_truncated_stream_is_completion_error() {
    let server = MockServer::start().await;
    let body = data_lines(&[
        r#"{"choices":[{"index":0,"delta":{"content":"He"},"finish_reason":null}]}"#,
        r#"{"choices":[{"index":0,"delta":{"content":"llo"},"finish_reason":null}]}"#,
    ]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let request = CompletionRequest::new(transcript()).with_stream(true);
    let (texts, _, error) = drain(groq(&server).complete(request).await.unwrap()).await;

    assert_eq!(texts, vec!["He", "llo"]);
    assert!(matches!(error, Some(ChatlineError::Completion(m)) if m.contains("[DONE]")));
}

#[tokio::test]
async fn test_openai_compat_non_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "4"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 20, "completion_tokens": 1, "total_tokens": 21}
        })))
        .mount(&server)
        .await;

    let (texts, usage, _) = drain(
        groq(&server)
            .complete(CompletionRequest::new(transcript()))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(texts, vec!["4"]);
    assert_eq!(usage, Some(Usage::new(20, 1)));
}

#[tokio::test]
async fn test_openai_compat_marker_text_becomes_tool_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Function call: lookup(city=\"Rome\")"}}]
        })))
        .mount(&server)
        .await;

    let (texts, _, _) = drain(
        groq(&server)
            .complete(CompletionRequest::new(transcript()))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(texts.len(), 1);
    let parsed: serde_json::Value = serde_json::from_str(&texts[0]).unwrap();
    assert_eq!(
        parsed,
        json!([{"tool_call": "lookup", "arguments": {"city": "Rome"}}])
    );
}

#[tokio::test]
async fn test_openai_compat_rate_limit_is_completion_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached", "type": "tokens"}
        })))
        .mount(&server)
        .await;

    let err = groq(&server)
        .complete(CompletionRequest::new(transcript()))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ChatlineError::Completion(m) if m.contains("Rate limit")));
}

// ==================== Local ====================

fn local(server: &MockServer) -> LocalProvider {
    let handle = LocalModelHandle::new(LocalModelConfig {
        base_url: Some(server.uri()),
        binary_path: PathBuf::from("llama-server"),
        model_path: PathBuf::from("/nonexistent/model.gguf"),
        port: 8847,
        ctx_size: None,
        gpu_layers: None,
    });
    LocalProvider::new(Arc::new(handle), "dolphin")
}

#[tokio::test]
async fn test_local_streaming_prompt_and_usage() {
    let server = MockServer::start().await;
    let body = data_lines(&[
        r#"{"content":"He","stop":false}"#,
        r#"{"content":"llo","stop":false}"#,
        r#"{"content":"","stop":true,"tokens_evaluated":7,"tokens_predicted":2}"#,
    ]);

    Mock::given(method("POST"))
        .and(path("/completion"))
        .and(body_partial_json(json!({
            "prompt": "Human You are terse.\nHuman 2+2?\nAssistant",
            "stop": ["Human"],
            "stream": true,
            "n_predict": 1024
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (texts, usage, error) = drain(
        local(&server)
            .complete(CompletionRequest::new(transcript()).with_stream(true))
            .await
            .unwrap(),
    )
    .await;

    assert!(error.is_none());
    assert_eq!(texts, vec!["He", "llo"]);
    assert_eq!(usage, Some(Usage::new(7, 2)));
}

#[tokio::test]
async fn test_local_truncated_stream_is_completion_error() {
    let server = MockServer::start().await;
    let body = data_lines(&[
        r#"{"content":"He","stop":false}"#,
        r#"{"content":"llo","stop":false}"#,
    ]);
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let (texts, usage, error) = drain(
        local(&server)
            .complete(CompletionRequest::new(transcript()).with_stream(true))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(texts, vec!["He", "llo"]);
    assert!(usage.is_none());
    assert!(matches!(error, Some(ChatlineError::Completion(m)) if m.contains("stop chunk")));
}

#[tokio::test]
async fn test_local_non_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": " 4",
            "stop": true,
            "tokens_evaluated": 7,
            "tokens_predicted": 1
        })))
        .mount(&server)
        .await;

    let (texts, usage, _) = drain(
        local(&server)
            .complete(CompletionRequest::new(transcript()))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(texts, vec![" 4"]);
    assert_eq!(usage, Some(Usage::new(7, 1)));
}

#[tokio::test]
async fn test_count_tokens_idempotent_across_backends() {
    let server = MockServer::start().await;
    let providers: Vec<Box<dyn CompletionProvider>> = vec![
        Box::new(anthropic(&server)),
        Box::new(groq(&server)),
        Box::new(local(&server)),
    ];
    let messages = transcript();
    for provider in providers {
        let model = provider.default_model().to_string();
        let first = provider.count_tokens(&messages, &model).unwrap();
        let second = provider.count_tokens(&messages, &model).unwrap();
        assert_eq!(first, second, "{}", provider.name());
        assert!(first > 0);
    }
}
