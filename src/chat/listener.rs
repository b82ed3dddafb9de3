// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Boundaries between the chat session and the outside world
//!
//! The session pulls input from a [`UserInputProvider`] and reports every
//! lifecycle event to a [`ChatListener`]. Both are supplied by the front-end.

use async_trait::async_trait;

use crate::error::{ChatlineError, Result};
use crate::llm::{Message, ModelOverrides, Usage};

/// Sink for the tokens of one response.
///
/// Acquired from [`ChatListener::response_streamer`] at the start of a
/// response and released by dropping it, which happens on every exit path.
pub trait ResponseStreamer {
    fn on_next_token(&mut self, token: &str);
}

/// Streamer that discards everything
pub struct NullStreamer;

impl ResponseStreamer for NullStreamer {
    fn on_next_token(&mut self, _token: &str) {}
}

/// Receives session lifecycle events. Every method defaults to a no-op.
pub trait ChatListener {
    fn on_chat_start(&mut self) {}

    fn on_chat_clear(&mut self) {}

    fn on_chat_rerun(&mut self, _success: bool) {}

    fn on_error(&mut self, _error: &ChatlineError) {}

    /// Open the scoped streamer for one response
    fn response_streamer(&mut self) -> Box<dyn ResponseStreamer + '_> {
        Box::new(NullStreamer)
    }

    /// A message was added to the transcript (user or assistant)
    fn on_chat_message(&mut self, _message: &Message) {}

    /// A response was committed.
    ///
    /// `prior_messages` is the transcript the response was generated from.
    fn on_chat_response(
        &mut self,
        _prior_messages: &[Message],
        _response: &Message,
        _overrides: &ModelOverrides,
        _usage: Option<&Usage>,
    ) {
    }
}

/// Source of user turns
#[async_trait]
pub trait UserInputProvider: Send {
    /// Next line of input plus the override arguments typed with it
    async fn get_user_input(&mut self) -> Result<(String, ModelOverrides)>;
}

/// Input provider replaying a fixed script, then quitting
pub struct ScriptedInput {
    lines: std::collections::VecDeque<(String, ModelOverrides)>,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines
                .into_iter()
                .map(|line| (line.into(), ModelOverrides::new()))
                .collect(),
        }
    }

    /// Queue a line with override arguments
    pub fn push(&mut self, line: impl Into<String>, overrides: ModelOverrides) {
        self.lines.push_back((line.into(), overrides));
    }
}

#[async_trait]
impl UserInputProvider for ScriptedInput {
    async fn get_user_input(&mut self) -> Result<(String, ModelOverrides)> {
        Ok(self
            .lines
            .pop_front()
            .unwrap_or_else(|| (":quit".to_string(), ModelOverrides::new())))
    }
}
