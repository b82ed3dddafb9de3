// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for chatline
//!
//! Handles loading and saving settings from ~/.chatline/settings.json

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

mod io;
mod merge;
mod validation;

/// Main settings structure, stored in ~/.chatline/settings.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Backend configurations
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Named assistants; built-ins are merged under these
    #[serde(default)]
    pub assistants: BTreeMap<String, AssistantConfig>,

    /// Assistant used when none is requested
    #[serde(default = "default_assistant_name")]
    pub default_assistant: String,

    /// Defaults for every session
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            providers: ProvidersConfig::default(),
            assistants: BTreeMap::new(),
            default_assistant: default_assistant_name(),
            defaults: DefaultsConfig::default(),
        }
    }
}

/// Configuration for completion backends
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// Anthropic Claude configuration
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    /// Groq (OpenAI-compatible)
    #[serde(default)]
    pub groq: OpenAiCompatConfig,

    /// Perplexity (OpenAI-compatible)
    #[serde(default)]
    pub perplexity: OpenAiCompatConfig,

    /// Local model through a llama.cpp server
    #[serde(default)]
    pub local: LocalLlmConfig,
}

/// Anthropic-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_anthropic_api_key_env")]
    pub api_key_env: String,

    /// Default model to use
    #[serde(default = "default_anthropic_model")]
    pub default_model: String,

    /// Base URL for API (for custom endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// OpenAI-compatible backend configuration.
///
/// Unset fields fall back to the backend's preset.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OpenAiCompatConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// File holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// Local model configuration (llama-server subprocess)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalLlmConfig {
    /// Existing llama.cpp server; when set no process is spawned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// llama-server executable
    #[serde(default = "default_local_binary")]
    pub binary_path: PathBuf,

    /// Path to the GGUF model file
    #[serde(default = "default_local_model_path")]
    pub model_path: PathBuf,

    /// Name reported for the model
    #[serde(default = "default_local_model")]
    pub default_model: String,

    /// Port for llama-server (default: 8847)
    #[serde(default = "default_local_port")]
    pub port: u16,

    /// Context size (None = model default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx_size: Option<u32>,

    /// GPU layers to offload (None = server default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_layers: Option<i32>,

    #[serde(default = "default_human_prompt")]
    pub human_prompt: String,

    #[serde(default = "default_assistant_prompt")]
    pub assistant_prompt: String,

    /// Completion length cap
    #[serde(default = "default_local_max_tokens")]
    pub max_tokens: u32,
}

/// A named assistant
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AssistantConfig {
    /// Backend to use (falls back to `defaults.provider`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

/// Default settings for sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Backend used when an assistant names none
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Stream responses token by token
    #[serde(default = "default_true")]
    pub stream: bool,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

fn default_assistant_name() -> String {
    "general".to_string()
}

fn default_anthropic_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_anthropic_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_local_binary() -> PathBuf {
    PathBuf::from("llama-server")
}

fn default_local_model_path() -> PathBuf {
    Settings::chatline_home().join("models").join("model.gguf")
}

fn default_local_model() -> String {
    "local".to_string()
}

fn default_local_port() -> u16 {
    crate::llm::providers::local::server::DEFAULT_PORT
}

fn default_human_prompt() -> String {
    crate::llm::providers::local::DEFAULT_HUMAN_PROMPT.to_string()
}

fn default_assistant_prompt() -> String {
    crate::llm::providers::local::DEFAULT_ASSISTANT_PROMPT.to_string()
}

fn default_local_max_tokens() -> u32 {
    crate::llm::providers::local::DEFAULT_MAX_TOKENS
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_true() -> bool {
    true
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_anthropic_api_key_env(),
            default_model: default_anthropic_model(),
            base_url: None,
        }
    }
}

impl Default for LocalLlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            binary_path: default_local_binary(),
            model_path: default_local_model_path(),
            default_model: default_local_model(),
            port: default_local_port(),
            ctx_size: None,
            gpu_layers: None,
            human_prompt: default_human_prompt(),
            assistant_prompt: default_assistant_prompt(),
            max_tokens: default_local_max_tokens(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            stream: true,
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

/// Assistants every installation has
pub fn builtin_assistants() -> BTreeMap<String, AssistantConfig> {
    let mut assistants = BTreeMap::new();
    assistants.insert(
        "general".to_string(),
        AssistantConfig {
            system_prompt: Some("You are a helpful assistant.".to_string()),
            ..Default::default()
        },
    );
    assistants.insert(
        "dev".to_string(),
        AssistantConfig {
            system_prompt: Some(
                "You are a helpful assistant who is an expert in software development. \
                 You are helping a user who is a software developer. Your responses are \
                 short and concise. You include code snippets when appropriate. Code \
                 snippets are formatted using Markdown with a correct language tag."
                    .to_string(),
            ),
            ..Default::default()
        },
    );
    assistants.insert(
        "quick".to_string(),
        AssistantConfig {
            system_prompt: Some(
                "You are a helpful assistant. Answer as concisely as possible.".to_string(),
            ),
            temperature: Some(0.2),
            ..Default::default()
        },
    );
    assistants
}
