// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI-compatible chat-completions provider
//!
//! Serves every backend that speaks the `/chat/completions` dialect. Groq and
//! Perplexity are shipped as presets; any other compatible endpoint can be
//! used by giving a base URL and model.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ChatlineError, Result};
use crate::llm::message::Message;
use crate::llm::provider::{CompletionProvider, CompletionRequest, FragmentStream, ToolSpec, Usage};
use crate::llm::providers::common::{estimate_text_tokens, response_error, sse_events};
use crate::llm::tool_calls::{normalize_stream, single_response, RawChunk, ToolCall};

/// Tokens of framing around every message
const TOKENS_PER_MESSAGE: u32 = 4;
/// Tokens priming the assistant reply
const REPLY_PRIMING_TOKENS: u32 = 2;

/// Known OpenAI-compatible backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub default_model: &'static str,
    pub api_key_env: &'static str,
    /// Key file under the home directory, if the backend has one
    pub key_file: Option<&'static str>,
}

pub const GROQ: Preset = Preset {
    name: "groq",
    base_url: "https://api.groq.com/openai/v1",
    default_model: "llama3-70b-8192",
    api_key_env: "GROQ_API_KEY",
    key_file: None,
};

pub const PERPLEXITY: Preset = Preset {
    name: "perplexity",
    base_url: "https://api.perplexity.ai",
    default_model: "sonar",
    api_key_env: "PERPLEXITY_API_KEY",
    key_file: Some(".perplexity.key"),
};

impl Preset {
    pub fn by_name(name: &str) -> Option<Preset> {
        [GROQ, PERPLEXITY].into_iter().find(|p| p.name == name)
    }
}

/// Provider for OpenAI-compatible chat-completions APIs
pub struct OpenAiCompatProvider {
    client: Client,
    name: String,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            name: name.into(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
        }
    }

    /// Create from a preset with its stock endpoint and model
    pub fn from_preset(preset: Preset, api_key: impl Into<String>) -> Self {
        Self::new(preset.name, api_key, preset.base_url, preset.default_model)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request<'a>(&'a self, request: &'a CompletionRequest) -> Result<ChatRequest<'a>> {
        let overrides = &request.overrides;
        Ok(ChatRequest {
            model: request.model_or(&self.default_model),
            messages: request
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role().as_str(),
                    content: m.content(),
                })
                .collect(),
            temperature: overrides.temperature()?,
            top_p: overrides.top_p()?,
            max_tokens: overrides.max_tokens()?,
            tools: request.tools.iter().map(ChatTool::from).collect(),
            stream: request.stream,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<FragmentStream> {
        request.validate()?;
        let body = self.build_request(&request)?;

        tracing::debug!(
            target: "chatline.provider",
            provider = %self.name,
            model = body.model,
            messages = body.messages.len(),
            stream = body.stream,
            "sending completion request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatlineError::Completion(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(response_error(response).await);
        }

        if !body.stream {
            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| ChatlineError::Completion(format!("invalid response body: {}", e)))?;

            let usage = parsed.usage.map(|u| Usage::new(u.prompt_tokens, u.completion_tokens));
            let message = parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message)
                .unwrap_or_default();

            let mut text = message.content.unwrap_or_default();
            let mut calls = Vec::new();
            for call in message.tool_calls.unwrap_or_default() {
                let accumulator = ToolCallAccumulator {
                    name: call.function.name,
                    arguments: call.function.arguments,
                };
                match accumulator.into_chunk() {
                    RawChunk::ToolCall(call) => calls.push(call),
                    RawChunk::Text(raw) => text.push_str(&raw),
                    RawChunk::Usage(_) => {}
                }
            }

            return Ok(single_response(&text, calls, usage));
        }

        let events = sse_events(response);
        let raw = async_stream::stream! {
            let mut events = Box::pin(events);
            let mut decoder = StreamDecoder::default();
            let mut done = false;

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                if event.data == "[DONE]" {
                    done = true;
                    break;
                }
                match decoder.handle(&event.data) {
                    Ok(chunks) => {
                        for chunk in chunks {
                            yield Ok(chunk);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            if !done && !decoder.finished {
                yield Err(ChatlineError::Completion(
                    "stream ended before [DONE]".to_string(),
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
        let body: u32 = messages
            .iter()
            .map(|m| TOKENS_PER_MESSAGE + estimate_text_tokens(m.role().as_str()) + estimate_text_tokens(m.content()))
            .sum();
        Ok(body + REPLY_PRIMING_TOKENS)
    }
}

/// Accumulates one streamed tool call
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_chunk(self) -> RawChunk {
        if self.arguments.trim().is_empty() {
            return RawChunk::ToolCall(ToolCall::new(self.name, serde_json::json!({})));
        }
        match serde_json::from_str(&self.arguments) {
            Ok(arguments) => RawChunk::ToolCall(ToolCall::new(self.name, arguments)),
            Err(e) => {
                tracing::warn!(target: "chatline.provider", tool = %self.name, error = %e, "tool arguments were not valid JSON");
                RawChunk::Text(self.arguments)
            }
        }
    }
}

/// Turns chat-completion chunks into raw chunks
#[derive(Debug, Default)]
struct StreamDecoder {
    tools: BTreeMap<usize, ToolCallAccumulator>,
    usage: Option<Usage>,
    /// A choice reported a finish reason
    finished: bool,
}

impl StreamDecoder {
    fn handle(&mut self, data: &str) -> Result<Vec<RawChunk>> {
        let chunk: ChatStreamChunk = serde_json::from_str(data)
            .map_err(|e| ChatlineError::Completion(format!("undecodable stream chunk: {}", e)))?;

        if let Some(error) = chunk.error {
            return Err(ChatlineError::Completion(error.message));
        }

        if let Some(usage) = chunk.usage.or(chunk.x_groq.and_then(|x| x.usage)) {
            self.usage = Some(Usage::new(usage.prompt_tokens, usage.completion_tokens));
        }

        let mut chunks = Vec::new();
        for choice in chunk.choices {
            for call in choice.delta.tool_calls.unwrap_or_default() {
                let entry = self.tools.entry(call.index.unwrap_or_default()).or_default();
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }

            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                chunks.push(RawChunk::Text(text));
            }
            if choice.finish_reason.is_some() {
                self.finished = true;
            }
        }
        Ok(chunks)
    }

    fn finish(self) -> Vec<RawChunk> {
        let mut chunks: Vec<RawChunk> = self
            .tools
            .into_values()
            .map(ToolCallAccumulator::into_chunk)
            .collect();
        if let Some(usage) = self.usage {
            chunks.push(RawChunk::Usage(usage));
        }
        chunks
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ChatFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ChatFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

impl<'a> From<&'a ToolSpec> for ChatTool<'a> {
    fn from(spec: &'a ToolSpec) -> Self {
        Self {
            tool_type: "function",
            function: ChatFunction {
                name: &spec.name,
                description: &spec.description,
                parameters: &spec.parameters,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ChatResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseToolCall {
    function: ChatResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ChatResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
    usage: Option<ChatUsage>,
    x_groq: Option<GroqExtension>,
    error: Option<ChatStreamError>,
}

#[derive(Debug, Deserialize)]
struct GroqExtension {
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    #[serde(default)]
    delta: ChatStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ChatStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamToolCall {
    index: Option<usize>,
    function: Option<ChatStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}
