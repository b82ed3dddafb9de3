// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! chatline - interactive terminal chat with hosted and local LLM backends.
//!
//! Architecture highlights:
//! - `llm`: message model, the completion provider abstraction and the
//!   Anthropic, OpenAI-compatible and local llama.cpp backends
//! - `chat`: the assistant, the session state machine and listener interfaces
//! - `config`: settings file, credentials and named assistants
//! - `cli`: argument parsing, console input and terminal rendering

pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;

pub use error::{ChatlineError, Result};
