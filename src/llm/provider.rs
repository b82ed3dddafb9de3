// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Completion provider trait and related types
//!
//! Defines the abstraction layer for different LLM backends. Callers only see
//! ordered messages going in and text fragments coming out; how a backend
//! wants its system prompt, its tool calls or its stream framing stays inside
//! the provider.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;

use crate::error::{ChatlineError, Result};
use crate::llm::message::Message;

/// Lazy, finite, non-restartable sequence of response fragments
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment>> + Send>>;

/// Main trait for completion backends
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Get the provider name (e.g., "anthropic", "groq")
    fn name(&self) -> &str;

    /// Model used when the request does not override it
    fn default_model(&self) -> &str;

    /// Start a completion.
    ///
    /// In streaming mode the returned stream yields text fragments in arrival
    /// order. Otherwise it yields exactly one text fragment with the whole
    /// response. Either may be followed by a `Usage` fragment.
    async fn complete(&self, request: CompletionRequest) -> Result<FragmentStream>;

    /// Count prompt tokens for a transcript (deterministic per model)
    fn count_tokens(&self, messages: &[Message], model: &str) -> Result<u32>;

    /// Count tokens for a single completion message
    fn count_completion_tokens(&self, message: &Message, model: &str) -> Result<u32> {
        self.count_tokens(std::slice::from_ref(message), model)
    }
}

/// Request for completion
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Messages in the conversation, oldest first
    pub messages: Vec<Message>,

    /// Resolved parameters for this call
    pub overrides: ModelOverrides,

    /// Whether to stream incremental fragments
    pub stream: bool,

    /// Tools available for the model to call
    pub tools: Vec<ToolSpec>,
}

impl CompletionRequest {
    /// Create a new non-streaming request
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            overrides: ModelOverrides::default(),
            stream: false,
            tools: vec![],
        }
    }

    pub fn with_overrides(mut self, overrides: ModelOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    /// Reject requests no backend can serve
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(ChatlineError::BadRequest(
                "completion request has no messages".to_string(),
            ));
        }
        Ok(())
    }

    /// Model from the overrides, or the provider default
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.overrides.model().unwrap_or(default)
    }
}

/// A unit of provider output
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Response text (or a normalized tool-call array)
    Text(String),
    /// Token accounting reported by the backend
    Usage(Usage),
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// True when computed locally instead of reported by the backend
    #[serde(default)]
    pub estimated: bool,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            estimated: false,
        }
    }

    pub fn estimated(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            estimated: true,
            ..Self::new(prompt_tokens, completion_tokens)
        }
    }
}

/// Tool definition in function-calling form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the arguments object
    #[serde(default = "empty_object_schema")]
    pub parameters: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Per-call parameter overrides keyed by parameter name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelOverrides(BTreeMap<String, serde_json::Value>);

impl ModelOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Layer `self` on top of `base`; keys in `self` win
    pub fn layered_over(&self, base: &ModelOverrides) -> ModelOverrides {
        let mut merged = base.clone();
        for (key, value) in &self.0 {
            merged.0.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Fail on the first key outside `allowed`
    pub fn validate(&self, allowed: &[&str]) -> Result<()> {
        match self.keys().find(|key| !allowed.contains(key)) {
            Some(key) => Err(ChatlineError::InvalidArgument(format!(
                "{}. Allowed arguments: {:?}",
                key, allowed
            ))),
            None => Ok(()),
        }
    }

    pub fn model(&self) -> Option<&str> {
        self.get("model").and_then(|v| v.as_str())
    }

    pub fn temperature(&self) -> Result<Option<f32>> {
        Ok(self.number("temperature")?.map(|v| v as f32))
    }

    pub fn top_p(&self) -> Result<Option<f32>> {
        Ok(self.number("top_p")?.map(|v| v as f32))
    }

    pub fn max_tokens(&self) -> Result<Option<u32>> {
        Ok(self.number("max_tokens")?.map(|v| v as u32))
    }

    /// Numeric parameter; numeric strings are accepted
    fn number(&self, key: &str) -> Result<Option<f64>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let parsed = match value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed.map(Some).ok_or_else(|| {
            ChatlineError::BadRequest(format!("{} must be a number, got {}", key, value))
        })
    }
}

impl FromIterator<(String, serde_json::Value)> for ModelOverrides {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
