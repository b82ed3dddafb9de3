// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM provider implementations

pub mod anthropic;
pub mod common;
pub mod local;
pub mod openai_compat;

pub use anthropic::AnthropicProvider;
pub use local::{LocalModelConfig, LocalModelHandle, LocalProvider};
pub use openai_compat::OpenAiCompatProvider;
