// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Local model provider backed by a llama.cpp server
//!
//! The transcript is folded into a single Human/Assistant text prompt and
//! sent to the server's `/completion` endpoint. The server is started on the
//! first request through the shared [`LocalModelHandle`].

pub mod handle;
pub mod server;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ChatlineError, Result};
use crate::llm::message::{Message, Role};
use crate::llm::provider::{CompletionProvider, CompletionRequest, FragmentStream, Usage};
use crate::llm::providers::common::{estimate_text_tokens, response_error, sse_events};
use crate::llm::tool_calls::{normalize_stream, single_response, RawChunk};

pub use handle::{LocalModelConfig, LocalModelHandle};

pub const DEFAULT_HUMAN_PROMPT: &str = "Human";
pub const DEFAULT_ASSISTANT_PROMPT: &str = "Assistant";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Prompt format for the local model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptFormat {
    pub human_prompt: String,
    pub assistant_prompt: String,
}

impl Default for PromptFormat {
    fn default() -> Self {
        Self {
            human_prompt: DEFAULT_HUMAN_PROMPT.to_string(),
            assistant_prompt: DEFAULT_ASSISTANT_PROMPT.to_string(),
        }
    }
}

impl PromptFormat {
    fn role_name(&self, role: Role) -> &str {
        match role {
            Role::System | Role::User => &self.human_prompt,
            Role::Assistant => &self.assistant_prompt,
        }
    }

    /// Fold a transcript into one prompt ending with the assistant cue
    pub fn render(&self, messages: &[Message]) -> String {
        let mut prompt = messages
            .iter()
            .map(|m| format!("{} {}", self.role_name(m.role()), m.content()))
            .collect::<Vec<_>>()
            .join("\n");
        prompt.push('\n');
        prompt.push_str(&self.assistant_prompt);
        prompt
    }
}

/// Local LLM provider using a llama.cpp server
pub struct LocalProvider {
    handle: Arc<LocalModelHandle>,
    client: Client,
    model_name: String,
    format: PromptFormat,
    max_tokens: u32,
}

impl LocalProvider {
    pub fn new(handle: Arc<LocalModelHandle>, model_name: impl Into<String>) -> Self {
        Self {
            handle,
            client: Client::new(),
            model_name: model_name.into(),
            format: PromptFormat::default(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_format(mut self, format: PromptFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_request(&self, request: &CompletionRequest) -> Result<LlamaRequest> {
        let overrides = &request.overrides;
        Ok(LlamaRequest {
            prompt: self.format.render(&request.messages),
            n_predict: overrides.max_tokens()?.unwrap_or(self.max_tokens),
            stream: request.stream,
            temperature: overrides.temperature()?,
            top_p: overrides.top_p()?,
            stop: vec![self.format.human_prompt.clone()],
        })
    }
}

#[async_trait]
impl CompletionProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn default_model(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<FragmentStream> {
        request.validate()?;
        if !request.tools.is_empty() {
            tracing::debug!(target: "chatline.provider", tools = request.tools.len(), "local model ignores tool definitions");
        }
        let body = self.build_request(&request)?;

        let endpoint = self.handle.acquire_once().await?;
        tracing::debug!(
            target: "chatline.provider",
            provider = "local",
            prompt_chars = body.prompt.len(),
            stream = body.stream,
            "sending completion request"
        );

        let response = self
            .client
            .post(format!("{}/completion", endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatlineError::Completion(format!("local server unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(response_error(response).await);
        }

        if !body.stream {
            let chunk: LlamaChunk = response
                .json()
                .await
                .map_err(|e| ChatlineError::Completion(format!("invalid response body: {}", e)))?;
            let usage = chunk.usage();
            return Ok(single_response(&chunk.content, vec![], usage));
        }

        let events = sse_events(response);
        let raw = async_stream::stream! {
            let mut events = Box::pin(events);
            let mut usage = None;
            let mut stopped = false;

            while let Some(event) = events.next().await {
                let chunk = event.and_then(|event| {
                    serde_json::from_str::<LlamaChunk>(&event.data).map_err(|e| {
                        ChatlineError::Completion(format!("undecodable stream chunk: {}", e))
                    })
                });
                match chunk {
                    Ok(chunk) => {
                        if !chunk.content.is_empty() {
                            yield Ok(RawChunk::Text(chunk.content.clone()));
                        }
                        if chunk.stop {
                            usage = chunk.usage();
                            stopped = true;
                            break;
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            if !stopped {
                yield Err(ChatlineError::Completion(
                    "local stream ended before the stop chunk".to_string(),
                ));
                return;
            }
            if let Some(usage) = usage {
                yield Ok(RawChunk::Usage(usage));
            }
        };

        Ok(normalize_stream(raw))
    }

    fn count_tokens(&self, messages: &[Message], _model: &str) -> Result<u32> {
        Ok(estimate_text_tokens(&self.format.render(messages)))
    }

    fn count_completion_tokens(&self, message: &Message, _model: &str) -> Result<u32> {
        Ok(estimate_text_tokens(message.content()))
    }
}

#[derive(Debug, Serialize)]
struct LlamaRequest {
    prompt: String,
    n_predict: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LlamaChunk {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
    tokens_evaluated: Option<u32>,
    tokens_predicted: Option<u32>,
}

impl LlamaChunk {
    fn usage(&self) -> Option<Usage> {
        match (self.tokens_evaluated, self.tokens_predicted) {
            (None, None) => None,
            (prompt, completion) => Some(Usage::new(
                prompt.unwrap_or_default(),
                completion.unwrap_or_default(),
            )),
        }
    }
}
