// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat session management
//!
//! The assistant, the session state machine, the command surface and the
//! listener interfaces the front-end implements.

pub mod assistant;
pub mod commands;
pub mod listener;
mod session;

pub use assistant::{Assistant, CompletionEvent, CompletionEventStream, SUPPORTED_OVERRIDES};
pub use commands::{parse_command, ChatCommand, COMMANDS_HELP};
pub use listener::{ChatListener, NullStreamer, ResponseStreamer, ScriptedInput, UserInputProvider};
pub use session::{ChatSession, InterruptHandle, SessionState, TurnOutcome, UserPrompt};
