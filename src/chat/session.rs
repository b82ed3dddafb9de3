// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat session state machine
//!
//! Owns the transcript and the history of user turns, interprets commands,
//! drives the assistant one turn at a time and decides whether a failed turn
//! is rolled back or committed.

use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::chat::assistant::{Assistant, CompletionEvent};
use crate::chat::commands::{parse_command, ChatCommand, COMMANDS_HELP};
use crate::chat::listener::{ChatListener, UserInputProvider};
use crate::error::{ChatlineError, Result, TurnDisposition};
use crate::llm::{Message, ModelOverrides, Role, Usage};

/// Where the session is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for input
    Idle,
    /// A completion is in progress
    Responding,
}

/// An accepted user turn, kept for `:rerun`
#[derive(Debug, Clone, PartialEq)]
pub struct UserPrompt {
    pub message: Message,
    pub overrides: ModelOverrides,
}

/// Result of one response attempt
#[derive(Debug)]
pub enum TurnOutcome {
    /// An assistant message was appended to the transcript
    Saved {
        message: Message,
        usage: Option<Usage>,
        interrupted: bool,
    },
    /// Nothing was appended; the caller drops the user message
    RolledBack,
    /// Nothing was appended and the session cannot continue
    Fatal(ChatlineError),
}

impl TurnOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, TurnOutcome::Saved { .. })
    }
}

/// Cancels the response currently being streamed.
///
/// Cloneable and usable from any task, e.g. a Ctrl+C handler.
#[derive(Clone, Default)]
pub struct InterruptHandle {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn begin_turn(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.slot() = Some(token.clone());
        token
    }

    fn end_turn(&self) {
        *self.slot() = None;
    }

    /// Stop the in-flight response. Returns false when nothing is streaming.
    pub fn interrupt(&self) -> bool {
        match self.slot().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_responding(&self) -> bool {
        self.slot().is_some()
    }
}

/// An interactive conversation with one assistant
pub struct ChatSession<L: ChatListener> {
    assistant: Assistant,
    listener: L,
    messages: Vec<Message>,
    user_prompts: Vec<UserPrompt>,
    state: SessionState,
    interrupt: InterruptHandle,
}

impl<L: ChatListener> ChatSession<L> {
    pub fn new(assistant: Assistant, listener: L) -> Self {
        let messages = assistant.init_messages();
        Self {
            assistant,
            listener,
            messages,
            user_prompts: vec![],
            state: SessionState::Idle,
            interrupt: InterruptHandle::new(),
        }
    }

    /// Share an interrupt handle created elsewhere
    pub fn with_interrupt_handle(mut self, handle: InterruptHandle) -> Self {
        self.interrupt = handle;
        self
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn user_prompts(&self) -> &[UserPrompt] {
        &self.user_prompts
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn assistant(&self) -> &Assistant {
        &self.assistant
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn into_listener(self) -> L {
        self.listener
    }

    /// Handle one line of input.
    ///
    /// Returns `Ok(false)` when the user quit. A configuration error is
    /// reported to the listener and then returned.
    pub async fn process_input(&mut self, input: &str, args: ModelOverrides) -> Result<bool> {
        if let Err(e) = args.validate(self.assistant.supported_overrides()) {
            tracing::debug!(target: "chatline.session", error = %e, "rejected override arguments");
            self.listener.on_error(&e);
            return Ok(true);
        }

        match parse_command(input) {
            ChatCommand::Quit => Ok(false),
            ChatCommand::Clear => {
                self.clear();
                Ok(true)
            }
            ChatCommand::Rerun => {
                self.rerun().await?;
                Ok(true)
            }
            ChatCommand::Help => {
                self.help();
                Ok(true)
            }
            ChatCommand::Message(text) => {
                let overrides = args.clone();
                self.add_user_message(text, args);
                match self.respond(&overrides).await {
                    TurnOutcome::Saved { .. } => Ok(true),
                    TurnOutcome::RolledBack => {
                        self.rollback_user_message();
                        Ok(true)
                    }
                    TurnOutcome::Fatal(e) => {
                        self.rollback_user_message();
                        Err(e)
                    }
                }
            }
        }
    }

    /// Read and process input until the user quits
    pub async fn run<I>(&mut self, input: &mut I) -> Result<()>
    where
        I: UserInputProvider + ?Sized,
    {
        self.listener.on_chat_start();
        loop {
            let (text, args) = input.get_user_input().await?;
            if !self.process_input(&text, args).await? {
                tracing::debug!(target: "chatline.session", "session ended by user");
                return Ok(());
            }
        }
    }

    /// Reset to the assistant's starting transcript
    pub fn clear(&mut self) {
        self.messages = self.assistant.init_messages();
        self.user_prompts.clear();
        self.listener.on_chat_clear();
    }

    /// Regenerate the response to the last user turn
    pub async fn rerun(&mut self) -> Result<()> {
        let Some(last) = self.user_prompts.last().cloned() else {
            self.listener.on_chat_rerun(false);
            return Ok(());
        };

        if self.messages.last().map(Message::role) == Some(Role::Assistant) {
            self.messages.pop();
        }

        self.listener.on_chat_rerun(true);
        match self.respond(&last.overrides).await {
            TurnOutcome::Fatal(e) => Err(e),
            _ => Ok(()),
        }
    }

    /// Write the command help through a response streamer
    pub fn help(&mut self) {
        let mut streamer = self.listener.response_streamer();
        streamer.on_next_token(COMMANDS_HELP);
    }

    fn add_user_message(&mut self, text: String, overrides: ModelOverrides) {
        let message = Message::user(text);
        self.listener.on_chat_message(&message);
        self.messages.push(message.clone());
        self.user_prompts.push(UserPrompt { message, overrides });
    }

    fn rollback_user_message(&mut self) {
        self.messages.pop();
        self.user_prompts.pop();
    }

    /// Generate, stream and commit one assistant response
    pub async fn respond(&mut self, overrides: &ModelOverrides) -> TurnOutcome {
        self.state = SessionState::Responding;
        let token = self.interrupt.begin_turn();

        let mut text = String::new();
        let mut usage = None;
        let mut failure = None;
        let mut interrupted = false;

        {
            let mut streamer = self.listener.response_streamer();

            let opened = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                opened = self.assistant.complete_chat(&self.messages, overrides) => Some(opened),
            };

            match opened {
                None => interrupted = true,
                Some(Err(e)) => failure = Some(e),
                Some(Ok(mut events)) => loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            interrupted = true;
                            break;
                        }
                        event = events.next() => match event {
                            Some(Ok(CompletionEvent::MessageDelta(delta))) => {
                                streamer.on_next_token(&delta);
                                text.push_str(&delta);
                            }
                            Some(Ok(CompletionEvent::Usage(reported))) => usage = Some(reported),
                            Some(Err(e)) => {
                                failure = Some(e);
                                break;
                            }
                            None => break,
                        }
                    }
                },
            }
        }

        self.interrupt.end_turn();
        self.state = SessionState::Idle;

        if interrupted {
            tracing::debug!(target: "chatline.session", chars = text.len(), "response interrupted");
        }

        if let Some(e) = failure {
            self.listener.on_error(&e);
            match e.turn_disposition() {
                TurnDisposition::RollBack => {
                    tracing::debug!(target: "chatline.session", error = %e, "turn rolled back");
                    return TurnOutcome::RolledBack;
                }
                TurnDisposition::Fatal => return TurnOutcome::Fatal(e),
                TurnDisposition::CommitPartial => {
                    tracing::warn!(
                        target: "chatline.session",
                        error = %e,
                        chars = text.len(),
                        "completion failed, keeping partial response"
                    );
                }
            }
        }

        let message = Message::assistant(text);
        self.listener.on_chat_message(&message);
        self.listener
            .on_chat_response(&self.messages, &message, overrides, usage.as_ref());
        self.messages.push(message.clone());

        TurnOutcome::Saved {
            message,
            usage,
            interrupted,
        }
    }
}
