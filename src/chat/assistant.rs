// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Assistant: a provider bound to a system prompt and parameter policy
//!
//! The assistant turns provider fragments into [`CompletionEvent`]s and
//! guarantees a usage report at the end of every successful completion,
//! estimating one when the backend does not send it.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;

use crate::config::{AssistantConfig, DefaultsConfig};
use crate::error::Result;
use crate::llm::{
    CompletionProvider, CompletionRequest, Fragment, Message, ModelOverrides, ToolSpec, Usage,
};

/// Parameters a user may override per turn
pub const SUPPORTED_OVERRIDES: &[&str] = &["model", "temperature", "top_p"];

/// Stream of events for one completion
pub type CompletionEventStream = Pin<Box<dyn Stream<Item = Result<CompletionEvent>> + Send>>;

/// Structured output of a completion
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    /// Incremental response text
    MessageDelta(String),
    /// Token accounting, always last
    Usage(Usage),
}

pub struct Assistant {
    provider: Arc<dyn CompletionProvider>,
    system_prompt: Option<String>,
    defaults: ModelOverrides,
    stream: bool,
    tools: Vec<ToolSpec>,
}

impl Assistant {
    /// Streaming assistant with no system prompt and no defaults
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            system_prompt: None,
            defaults: ModelOverrides::new(),
            stream: true,
            tools: vec![],
        }
    }

    /// Build from a named assistant entry and the session defaults.
    ///
    /// Assistant values win over the session defaults; per-turn overrides
    /// win over both when the turn runs.
    pub fn from_config(
        provider: Arc<dyn CompletionProvider>,
        config: &AssistantConfig,
        defaults: &DefaultsConfig,
    ) -> Self {
        let mut params = ModelOverrides::new()
            .with("temperature", config.temperature.unwrap_or(defaults.temperature))
            .with("top_p", config.top_p.unwrap_or(defaults.top_p));
        if let Some(model) = &config.model {
            params.insert("model", model.as_str());
        }

        let mut assistant = Self::new(provider)
            .with_defaults(params)
            .with_stream(defaults.stream);
        assistant.system_prompt = config.system_prompt.clone();
        assistant
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_defaults(mut self, defaults: ModelOverrides) -> Self {
        self.defaults = defaults;
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

    pub fn provider(&self) -> &Arc<dyn CompletionProvider> {
        &self.provider
    }

    pub fn defaults(&self) -> &ModelOverrides {
        &self.defaults
    }

    /// Model a turn with these overrides would use
    pub fn model_for(&self, overrides: &ModelOverrides) -> String {
        overrides
            .model()
            .or_else(|| self.defaults.model())
            .unwrap_or_else(|| self.provider.default_model())
            .to_string()
    }

    /// Starting transcript: the system prompt, if any
    pub fn init_messages(&self) -> Vec<Message> {
        self.system_prompt
            .iter()
            .map(|prompt| Message::system(prompt.as_str()))
            .collect()
    }

    pub fn supported_overrides(&self) -> &'static [&'static str] {
        SUPPORTED_OVERRIDES
    }

    /// Complete the transcript.
    ///
    /// Unsupported override keys fail with `InvalidArgument` before the
    /// provider is called.
    pub async fn complete_chat(
        &self,
        messages: &[Message],
        overrides: &ModelOverrides,
    ) -> Result<CompletionEventStream> {
        overrides.validate(self.supported_overrides())?;

        let params = overrides.layered_over(&self.defaults);
        let model = self.model_for(overrides);
        let request = CompletionRequest::new(messages.to_vec())
            .with_overrides(params)
            .with_stream(self.stream)
            .with_tools(self.tools.clone());

        tracing::debug!(
            target: "chatline.session",
            provider = self.provider.name(),
            model = %model,
            messages = messages.len(),
            stream = self.stream,
            "starting completion"
        );

        let mut fragments = self.provider.complete(request).await?;
        let provider = Arc::clone(&self.provider);
        let prompt = messages.to_vec();

        let events = async_stream::stream! {
            let mut text = String::new();
            let mut usage = None;

            while let Some(fragment) = fragments.next().await {
                match fragment {
                    Ok(Fragment::Text(delta)) => {
                        text.push_str(&delta);
                        yield Ok(CompletionEvent::MessageDelta(delta));
                    }
                    Ok(Fragment::Usage(reported)) => usage = Some(reported),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            let usage = match usage {
                Some(usage) => Some(usage),
                None => estimate_usage(provider.as_ref(), &prompt, &text, &model),
            };
            if let Some(usage) = usage {
                yield Ok(CompletionEvent::Usage(usage));
            }
        };

        Ok(Box::pin(events))
    }
}

fn estimate_usage(
    provider: &dyn CompletionProvider,
    prompt: &[Message],
    response: &str,
    model: &str,
) -> Option<Usage> {
    let counted = provider.count_tokens(prompt, model).and_then(|prompt_tokens| {
        let completion = provider.count_completion_tokens(&Message::assistant(response), model)?;
        Ok(Usage::estimated(prompt_tokens, completion))
    });
    match counted {
        Ok(usage) => Some(usage),
        Err(e) => {
            tracing::warn!(target: "chatline.session", error = %e, "could not estimate token usage");
            None
        }
    }
}
