// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider factory for creating completion providers
//!
//! Owns the shared local model handle so every local provider it creates
//! talks to the same server process.

use std::sync::Arc;

use crate::config::Settings;
use crate::error::{ChatlineError, Result};
use crate::llm::provider::CompletionProvider;
use crate::llm::providers::local::PromptFormat;
use crate::llm::providers::openai_compat::Preset;
use crate::llm::providers::{
    AnthropicProvider, LocalModelHandle, LocalProvider, OpenAiCompatProvider,
};

/// Names accepted by [`ProviderFactory::create`]
pub const PROVIDER_NAMES: &[&str] = &["anthropic", "groq", "perplexity", "local"];

/// Fallback order when the default provider has no credentials
const HOSTED_PROVIDERS: &[&str] = &["anthropic", "groq", "perplexity"];

/// Factory for creating completion providers
pub struct ProviderFactory {
    settings: Settings,
    local: Arc<LocalModelHandle>,
}

impl ProviderFactory {
    pub fn new(settings: Settings) -> Self {
        let local = Arc::new(LocalModelHandle::new(settings.local_model_config()));
        Self { settings, local }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Create a provider by name
    ///
    /// # Arguments
    /// * `provider_name` - One of: "anthropic", "groq", "perplexity", "local"
    pub fn create(&self, provider_name: &str) -> Result<Arc<dyn CompletionProvider>> {
        tracing::debug!(target: "chatline.provider", provider = provider_name, "creating provider");
        match provider_name {
            "anthropic" => self.create_anthropic(),
            "local" => Ok(self.create_local()),
            other => match Preset::by_name(other) {
                Some(preset) => self.create_openai_compat(preset),
                None => Err(ChatlineError::Configuration(format!(
                    "unknown provider '{}'. Supported: {}",
                    other,
                    PROVIDER_NAMES.join(", ")
                ))),
            },
        }
    }

    /// Create an Anthropic provider
    pub fn create_anthropic(&self) -> Result<Arc<dyn CompletionProvider>> {
        let config = &self.settings.providers.anthropic;
        let api_key = self.settings.get_anthropic_api_key().ok_or_else(|| {
            ChatlineError::Configuration(format!(
                "No Anthropic API key found. Set {} or providers.anthropic.api_key in {}.",
                config.api_key_env,
                Settings::default_path().display()
            ))
        })?;

        let provider = match &config.base_url {
            Some(base_url) => AnthropicProvider::with_base_url(api_key, base_url),
            None => AnthropicProvider::new(api_key),
        };

        Ok(Arc::new(provider.with_default_model(&config.default_model)))
    }

    /// Create an OpenAI-compatible provider from a preset
    pub fn create_openai_compat(&self, preset: Preset) -> Result<Arc<dyn CompletionProvider>> {
        let config = self.settings.openai_compat_config(preset);
        let api_key = self
            .settings
            .get_openai_compat_api_key(preset)
            .ok_or_else(|| {
                let mut sources = vec![config
                    .api_key_env
                    .clone()
                    .unwrap_or_else(|| preset.api_key_env.to_string())];
                if let Some(file) = preset.key_file {
                    sources.push(format!("~/{}", file));
                }
                ChatlineError::Configuration(format!(
                    "No {} API key found. Set {} or providers.{}.api_key.",
                    preset.name,
                    sources.join(" or "),
                    preset.name
                ))
            })?;

        let mut provider = OpenAiCompatProvider::from_preset(preset, api_key);
        if let Some(base_url) = &config.base_url {
            provider = provider.with_base_url(base_url);
        }
        if let Some(model) = &config.default_model {
            provider = provider.with_default_model(model);
        }
        Ok(Arc::new(provider))
    }

    /// Create a local provider sharing this factory's model handle
    pub fn create_local(&self) -> Arc<dyn CompletionProvider> {
        let config = &self.settings.providers.local;
        let provider = LocalProvider::new(Arc::clone(&self.local), &config.default_model)
            .with_format(PromptFormat {
                human_prompt: config.human_prompt.clone(),
                assistant_prompt: config.assistant_prompt.clone(),
            })
            .with_max_tokens(config.max_tokens);
        Arc::new(provider)
    }

    /// Stop the local model server if one was started
    pub fn shutdown(&self) {
        self.local.shutdown();
    }

    /// Provider name from the request, with fallback to the default.
    ///
    /// An explicit request is never replaced. When the default provider has
    /// no credentials, the first hosted provider that does is used instead.
    pub fn resolve_provider_name(&self, requested: Option<&str>) -> String {
        if let Some(name) = requested {
            return name.to_string();
        }

        let default = &self.settings.defaults.provider;
        if self.settings.is_provider_configured(default) {
            return default.clone();
        }
        match HOSTED_PROVIDERS
            .iter()
            .find(|name| self.settings.is_provider_configured(name))
        {
            Some(name) => {
                tracing::debug!(target: "chatline.provider", default = %default, using = %name, "default provider has no credentials");
                name.to_string()
            }
            None => default.clone(),
        }
    }
}
