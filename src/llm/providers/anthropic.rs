// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Anthropic Claude API provider implementation
//!
//! Implements the CompletionProvider trait for Claude models over the
//! Messages API. The system directive travels in its own `system` field.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ChatlineError, Result};
use crate::llm::message::{split_system, Message, Role};
use crate::llm::provider::{CompletionProvider, CompletionRequest, FragmentStream, ToolSpec, Usage};
use crate::llm::providers::common::{estimate_text_tokens, response_error, sse_events, SseEvent};
use crate::llm::tool_calls::{normalize_stream, single_response, RawChunk, ToolCall};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Turn markers of the legacy text-completion prompt format
const HUMAN_PROMPT: &str = "\n\nHuman:";
const AI_PROMPT: &str = "\n\nAssistant:";

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create with a custom base URL
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::new(api_key)
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Build the request body
    fn build_request<'a>(&'a self, request: &'a CompletionRequest) -> Result<AnthropicRequest<'a>> {
        let (system, rest) = split_system(&request.messages);
        let overrides = &request.overrides;

        Ok(AnthropicRequest {
            model: request.model_or(&self.default_model),
            messages: rest
                .iter()
                .map(|m| AnthropicMessage {
                    role: match m.role() {
                        Role::Assistant => "assistant",
                        Role::User | Role::System => "user",
                    },
                    content: m.content(),
                })
                .collect(),
            system,
            max_tokens: overrides.max_tokens()?.unwrap_or(DEFAULT_MAX_TOKENS),
            stop_sequences: vec![HUMAN_PROMPT],
            temperature: overrides.temperature()?,
            top_p: overrides.top_p()?,
            tools: request.tools.iter().map(AnthropicTool::from).collect(),
            stream: request.stream,
        })
    }

    async fn send(&self, body: &AnthropicRequest<'_>) -> Result<reqwest::Response> {
        tracing::debug!(
            target: "chatline.provider",
            provider = "anthropic",
            model = body.model,
            messages = body.messages.len(),
            stream = body.stream,
            "sending completion request"
        );

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ChatlineError::Completion(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(response_error(response).await);
        }
        Ok(response)
    }
}

/// Render the transcript as a Human/Assistant text prompt
fn folded_prompt(messages: &[Message]) -> String {
    let mut prompt = messages
        .iter()
        .map(|m| {
            let label = match m.role() {
                Role::System | Role::User => HUMAN_PROMPT,
                Role::Assistant => AI_PROMPT,
            };
            format!("{}{}", label, m.content())
        })
        .collect::<Vec<_>>()
        .join("\n");
    prompt.push_str(AI_PROMPT);
    prompt
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<FragmentStream> {
        request.validate()?;
        let body = self.build_request(&request)?;
        let response = self.send(&body).await?;

        if !body.stream {
            let api_response: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| ChatlineError::Completion(format!("invalid response body: {}", e)))?;

            let mut text = String::new();
            let mut calls = Vec::new();
            for block in api_response.content {
                match block {
                    AnthropicContentBlock::Text { text: t } => text.push_str(&t),
                    AnthropicContentBlock::ToolUse { name, input } => {
                        calls.push(ToolCall::new(name, input))
                    }
                    AnthropicContentBlock::Other => {}
                }
            }
            let usage = Usage::new(
                api_response.usage.input_tokens,
                api_response.usage.output_tokens,
            );
            return Ok(single_response(&text, calls, Some(usage)));
        }

        let events = sse_events(response);
        let raw = async_stream::stream! {
            let mut events = Box::pin(events);
            let mut decoder = StreamDecoder::default();

            while let Some(event) = events.next().await {
                let chunks = event.and_then(|event| decoder.handle(&event));
                match chunks {
                    Ok(chunks) => {
                        for chunk in chunks {
                            yield Ok(chunk);
                        }
                        if decoder.done {
                            break;
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            if !decoder.done {
                yield Err(ChatlineError::Completion(
                    "stream ended before message_stop".to_string(),
                ));
                return;
            }
            for chunk in decoder.finish() {
                yield Ok(chunk);
            }
        };

        Ok(normalize_stream(raw))
    }

    fn count_tokens(&self, messages: &[Message], _model: &str) -> Result<u32> {
        Ok(estimate_text_tokens(&folded_prompt(messages)))
    }

    fn count_completion_tokens(&self, message: &Message, _model: &str) -> Result<u32> {
        Ok(estimate_text_tokens(message.content()))
    }
}

/// Turns Messages API stream events into raw chunks
#[derive(Debug, Default)]
struct StreamDecoder {
    /// Open tool_use blocks by index: name and accumulated JSON
    tools: HashMap<u64, (String, String)>,
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    done: bool,
}

impl StreamDecoder {
    fn handle(&mut self, event: &SseEvent) -> Result<Vec<RawChunk>> {
        let kind = event.event.as_deref().unwrap_or_default();
        if kind == "ping" {
            return Ok(vec![]);
        }

        let data: serde_json::Value = serde_json::from_str(&event.data).map_err(|e| {
            ChatlineError::Completion(format!("undecodable {} event: {}", kind, e))
        })?;

        let mut chunks = Vec::new();
        match kind {
            "message_start" => {
                let usage = &data["message"]["usage"];
                if let Some(input) = usage["input_tokens"].as_u64() {
                    self.input_tokens = Some(input as u32);
                }
                if let Some(output) = usage["output_tokens"].as_u64() {
                    self.output_tokens = Some(output as u32);
                }
            }
            "content_block_start" => {
                let block = &data["content_block"];
                let index = data["index"].as_u64().unwrap_or_default();
                match block["type"].as_str() {
                    Some("tool_use") => {
                        let name = block["name"].as_str().unwrap_or_default().to_string();
                        self.tools.insert(index, (name, String::new()));
                    }
                    Some("text") => {
                        if let Some(text) = block["text"].as_str().filter(|t| !t.is_empty()) {
                            chunks.push(RawChunk::Text(text.to_string()));
                        }
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let delta = &data["delta"];
                let index = data["index"].as_u64().unwrap_or_default();
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        if let Some(text) = delta["text"].as_str() {
                            chunks.push(RawChunk::Text(text.to_string()));
                        }
                    }
                    Some("input_json_delta") => {
                        if let (Some((_, json)), Some(partial)) =
                            (self.tools.get_mut(&index), delta["partial_json"].as_str())
                        {
                            json.push_str(partial);
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                let index = data["index"].as_u64().unwrap_or_default();
                if let Some((name, json)) = self.tools.remove(&index) {
                    chunks.push(tool_chunk(name, &json));
                }
            }
            "message_delta" => {
                if let Some(output) = data["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = Some(output as u32);
                }
            }
            "message_stop" => self.done = true,
            "error" => {
                let message = data["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error");
                return Err(ChatlineError::Completion(message.to_string()));
            }
            _ => {}
        }
        Ok(chunks)
    }

    fn finish(mut self) -> Vec<RawChunk> {
        let mut chunks: Vec<RawChunk> = self
            .tools
            .drain()
            .map(|(_, (name, json))| tool_chunk(name, &json))
            .collect();

        if self.input_tokens.is_some() || self.output_tokens.is_some() {
            chunks.push(RawChunk::Usage(Usage::new(
                self.input_tokens.unwrap_or_default(),
                self.output_tokens.unwrap_or_default(),
            )));
        }
        chunks
    }
}

fn tool_chunk(name: String, json: &str) -> RawChunk {
    if json.trim().is_empty() {
        return RawChunk::ToolCall(ToolCall::new(name, serde_json::json!({})));
    }
    match serde_json::from_str(json) {
        Ok(arguments) => RawChunk::ToolCall(ToolCall::new(name, arguments)),
        Err(e) => {
            tracing::warn!(target: "chatline.provider", tool = %name, error = %e, "tool input was not valid JSON");
            RawChunk::Text(json.to_string())
        }
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    max_tokens: u32,
    stop_sequences: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

impl<'a> From<&'a ToolSpec> for AnthropicTool<'a> {
    fn from(spec: &'a ToolSpec) -> Self {
        Self {
            name: &spec.name,
            description: &spec.description,
            input_schema: &spec.parameters,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::ModelOverrides;
    use serde_json::json;

    fn event(kind: &str, data: serde_json::Value) -> SseEvent {
        SseEvent {
            event: Some(kind.to_string()),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_provider_new() {
        let provider = AnthropicProvider::new("test-key");
        assert_eq!(provider.api_key, "test-key");
        assert_eq!(provider.base_url, ANTHROPIC_API_URL);
        assert_eq!(provider.default_model(), DEFAULT_MODEL);
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn test_provider_with_base_url() {
        let provider = AnthropicProvider::with_base_url("test-key", "https://custom.api.com")
            .with_default_model("claude-3-5-haiku-20241022");
        assert_eq!(provider.base_url, "https://custom.api.com");
        assert_eq!(provider.default_model(), "claude-3-5-haiku-20241022");
    }

    #[test]
    fn test_build_request_moves_system_out_of_messages() {
        let provider = AnthropicProvider::new("k");
        let request = CompletionRequest::new(vec![
            Message::system("Be terse."),
            Message::user("Hi"),
            Message::assistant("Hello"),
            Message::user("Bye"),
        ]);
        let body = serde_json::to_value(provider.build_request(&request).unwrap()).unwrap();

        assert_eq!(body["system"], "Be terse.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
        assert_eq!(body["messages"][0], json!({"role": "user", "content": "Hi"}));
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert_eq!(body["stop_sequences"], json!(["\n\nHuman:"]));
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["stream"], false);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_build_request_without_system() {
        let provider = AnthropicProvider::new("k");
        let request = CompletionRequest::new(vec![Message::user("Hi")]);
        let body = serde_json::to_value(provider.build_request(&request).unwrap()).unwrap();
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_build_request_applies_overrides() {
        let provider = AnthropicProvider::new("k");
        let request = CompletionRequest::new(vec![Message::user("Hi")])
            .with_overrides(
                ModelOverrides::new()
                    .with("model", "claude-3-opus")
                    .with("temperature", 0.25)
                    .with("top_p", 0.5)
                    .with("max_tokens", 100),
            )
            .with_tools(vec![ToolSpec {
                name: "lookup".to_string(),
                description: "Look up a city".to_string(),
                parameters: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
            }]);
        let body = serde_json::to_value(provider.build_request(&request).unwrap()).unwrap();

        assert_eq!(body["model"], "claude-3-opus");
        assert_eq!(body["temperature"], 0.25);
        assert_eq!(body["top_p"], 0.5);
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["tools"][0]["name"], "lookup");
        assert_eq!(body["tools"][0]["input_schema"]["properties"]["city"]["type"], "string");
    }

    #[test]
    fn test_build_request_rejects_non_numeric_temperature() {
        let provider = AnthropicProvider::new("k");
        let request = CompletionRequest::new(vec![Message::user("Hi")])
            .with_overrides(ModelOverrides::new().with("temperature", "warm"));
        let err = provider.build_request(&request).unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn test_folded_prompt() {
        let prompt = folded_prompt(&[Message::system("S"), Message::user("U")]);
        assert_eq!(prompt, "\n\nHuman:S\n\n\nHuman:U\n\nAssistant:");
    }

    #[test]
    fn test_count_tokens_deterministic() {
        let provider = AnthropicProvider::new("k");
        let messages = vec![Message::system("S"), Message::user("How are you?")];
        let a = provider.count_tokens(&messages, DEFAULT_MODEL).unwrap();
        let b = provider.count_tokens(&messages, DEFAULT_MODEL).unwrap();
        assert_eq!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn test_decoder_text_deltas() {
        let mut decoder = StreamDecoder::default();
        let chunks = decoder
            .handle(&event(
                "content_block_delta",
                json!({"index": 0, "delta": {"type": "text_delta", "text": "Hel"}}),
            ))
            .unwrap();
        assert_eq!(chunks, vec![RawChunk::Text("Hel".to_string())]);
    }

    #[test]
    fn test_decoder_tool_use_block() {
        let mut decoder = StreamDecoder::default();
        decoder
            .handle(&event(
                "content_block_start",
                json!({"index": 1, "content_block": {"type": "tool_use", "id": "t1", "name": "lookup", "input": {}}}),
            ))
            .unwrap();
        decoder
            .handle(&event(
                "content_block_delta",
                json!({"index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"city\": "}}),
            ))
            .unwrap();
        decoder
            .handle(&event(
                "content_block_delta",
                json!({"index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"Rome\"}"}}),
            ))
            .unwrap();
        let chunks = decoder
            .handle(&event("content_block_stop", json!({"index": 1})))
            .unwrap();

        assert_eq!(
            chunks,
            vec![RawChunk::ToolCall(ToolCall::new("lookup", json!({"city": "Rome"})))]
        );
    }

    #[test]
    fn test_decoder_usage() {
        let mut decoder = StreamDecoder::default();
        decoder
            .handle(&event(
                "message_start",
                json!({"message": {"id": "m", "usage": {"input_tokens": 12, "output_tokens": 1}}}),
            ))
            .unwrap();
        decoder
            .handle(&event(
                "message_delta",
                json!({"delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 7}}),
            ))
            .unwrap();
        decoder.handle(&event("message_stop", json!({}))).unwrap();
        assert!(decoder.done);
        assert_eq!(decoder.finish(), vec![RawChunk::Usage(Usage::new(12, 7))]);
    }

    #[test]
    fn test_decoder_error_event() {
        let mut decoder = StreamDecoder::default();
        let err = decoder
            .handle(&event(
                "error",
                json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
            ))
            .unwrap_err();
        assert!(matches!(err, ChatlineError::Completion(m) if m == "Overloaded"));
    }

    #[test]
    fn test_decoder_ignores_ping() {
        let mut decoder = StreamDecoder::default();
        let ping = SseEvent {
            event: Some("ping".to_string()),
            data: String::new(),
        };
        assert!(decoder.handle(&ping).unwrap().is_empty());
    }

    #[test]
    fn test_tool_chunk_invalid_json_degrades() {
        assert_eq!(
            tool_chunk("lookup".to_string(), "{\"city\""),
            RawChunk::Text("{\"city\"".to_string())
        );
        assert_eq!(
            tool_chunk("now".to_string(), ""),
            RawChunk::ToolCall(ToolCall::new("now", json!({})))
        );
    }
}
