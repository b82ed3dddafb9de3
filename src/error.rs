// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for chatline
//!
//! Every failure a turn can hit is one of these variants. The chat session
//! is the only place that decides what a variant means for the transcript
//! (see [`ChatlineError::turn_disposition`]).

use thiserror::Error;

/// Main error type for chatline operations
#[derive(Error, Debug)]
pub enum ChatlineError {
    /// Missing or invalid credential, model path or provider setting
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The backend rejected the request (bad parameter, malformed prompt)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Transient backend or runtime failure during a completion
    #[error("Completion failed: {0}")]
    Completion(String),

    /// Backend emitted a tool call whose payload could not be parsed
    #[error("Malformed tool call: {0}")]
    ToolParse(String),

    /// User supplied an override key the assistant does not accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A value failed validation (unknown role, empty transcript)
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// What a failed turn does to the transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDisposition {
    /// Drop the user message that started the turn
    RollBack,
    /// Keep whatever assistant text arrived before the failure
    CommitPartial,
    /// Roll back and stop the session
    Fatal,
}

impl ChatlineError {
    /// Classify an error raised while a turn is in flight.
    ///
    /// Anything that is not a request or configuration problem commits the
    /// partial response, including transport and decode failures. This is
    /// deliberately broad and may hide real failures behind a short answer.
    pub fn turn_disposition(&self) -> TurnDisposition {
        match self {
            ChatlineError::BadRequest(_) | ChatlineError::InvalidArgument(_) => {
                TurnDisposition::RollBack
            }
            ChatlineError::Configuration(_) => TurnDisposition::Fatal,
            _ => TurnDisposition::CommitPartial,
        }
    }

    /// Whether the error is a rejected request
    pub fn is_bad_request(&self) -> bool {
        matches!(self, ChatlineError::BadRequest(_))
    }

    /// Map an HTTP status from a hosted backend onto the error taxonomy
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 404 | 413 | 422 => ChatlineError::BadRequest(message),
            401 | 403 => ChatlineError::Configuration(format!(
                "credential rejected ({}): {}",
                status, message
            )),
            _ => ChatlineError::Completion(format!("backend returned {}: {}", status, message)),
        }
    }
}

/// Result type alias for chatline operations
pub type Result<T> = std::result::Result<T, ChatlineError>;
