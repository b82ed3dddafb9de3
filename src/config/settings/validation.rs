// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ChatlineError, Result};
use crate::llm::providers::local::LocalModelConfig;
use crate::llm::providers::openai_compat::Preset;

use super::{builtin_assistants, AssistantConfig, OpenAiCompatConfig, Settings};

impl Settings {
    /// Get the API key for Anthropic, checking env var first.
    pub fn get_anthropic_api_key(&self) -> Option<String> {
        // Priority: env var > config file.
        non_empty_env(&self.providers.anthropic.api_key_env)
            .or_else(|| self.providers.anthropic.api_key.clone())
    }

    /// Configuration block for an OpenAI-compatible preset
    pub fn openai_compat_config(&self, preset: Preset) -> &OpenAiCompatConfig {
        match preset.name {
            "perplexity" => &self.providers.perplexity,
            _ => &self.providers.groq,
        }
    }

    /// Get the API key for an OpenAI-compatible backend.
    ///
    /// Priority: env var > config file > key file.
    pub fn get_openai_compat_api_key(&self, preset: Preset) -> Option<String> {
        let config = self.openai_compat_config(preset);
        let env_name = config.api_key_env.as_deref().unwrap_or(preset.api_key_env);

        non_empty_env(env_name)
            .or_else(|| config.api_key.clone())
            .or_else(|| {
                let path = config.key_file.clone().or_else(|| {
                    preset
                        .key_file
                        .and_then(|file| dirs::home_dir().map(|home| home.join(file)))
                })?;
                read_key_file(&path)
            })
    }

    /// Check if the given provider has a usable configuration.
    pub fn is_provider_configured(&self, provider: &str) -> bool {
        match provider {
            "local" => true,
            "anthropic" => self.get_anthropic_api_key().is_some(),
            other => Preset::by_name(other)
                .map(|preset| self.get_openai_compat_api_key(preset).is_some())
                .unwrap_or(false),
        }
    }

    /// All assistants: built-ins with user entries layered on top
    pub fn all_assistants(&self) -> BTreeMap<String, AssistantConfig> {
        let mut assistants = builtin_assistants();
        for (name, user) in &self.assistants {
            let merged = match assistants.remove(name) {
                Some(builtin) => AssistantConfig {
                    provider: user.provider.clone().or(builtin.provider),
                    system_prompt: user.system_prompt.clone().or(builtin.system_prompt),
                    model: user.model.clone().or(builtin.model),
                    temperature: user.temperature.or(builtin.temperature),
                    top_p: user.top_p.or(builtin.top_p),
                },
                None => user.clone(),
            };
            assistants.insert(name.clone(), merged);
        }
        assistants
    }

    /// Look up an assistant by name (the default one if `None`)
    pub fn assistant(&self, name: Option<&str>) -> Result<(String, AssistantConfig)> {
        let name = name.unwrap_or(&self.default_assistant);
        let mut assistants = self.all_assistants();
        assistants
            .remove(name)
            .map(|config| (name.to_string(), config))
            .ok_or_else(|| {
                ChatlineError::Configuration(format!(
                    "unknown assistant '{}'. Available: {}",
                    name,
                    assistants.keys().cloned().collect::<Vec<_>>().join(", ")
                ))
            })
    }

    /// Server settings for the local model
    pub fn local_model_config(&self) -> LocalModelConfig {
        let local = &self.providers.local;
        LocalModelConfig {
            base_url: local.base_url.clone(),
            binary_path: local.binary_path.clone(),
            model_path: local.model_path.clone(),
            port: local.port,
            ctx_size: local.ctx_size,
            gpu_layers: local.gpu_layers,
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_key_file(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content.trim().to_string()).filter(|k| !k.is_empty()),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "no key file");
            None
        }
    }
}
