// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock completion provider for testing
//!
//! Provides a scripted implementation of the CompletionProvider trait that
//! can be used in unit tests without making real API calls. Fragments go
//! through the same tool-call normalization as the real backends.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{ChatlineError, Result};
use crate::llm::message::Message;
use crate::llm::provider::{CompletionProvider, CompletionRequest, FragmentStream, Usage};
use crate::llm::providers::common::estimate_text_tokens;
use crate::llm::tool_calls::{normalize_stream, single_response, RawChunk};

/// A mock provider for testing
#[derive(Clone)]
pub struct MockProvider {
    /// Provider name
    name: String,
    /// Configured responses, consumed in order (the last one repeats)
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// Call counter
    call_count: Arc<AtomicUsize>,
    /// Recorded requests
    recorded_requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

/// A pre-configured response for the mock provider
#[derive(Clone, Debug)]
pub struct MockResponse {
    /// Text fragments to stream, in order
    pub fragments: Vec<String>,
    /// Usage reported at the end of the stream
    pub usage: Option<Usage>,
    /// Fail before producing a stream
    pub open_error: Option<MockFailure>,
    /// Fail after all fragments have been produced
    pub stream_error: Option<MockFailure>,
    /// Never finish after the fragments (for interrupt tests)
    pub hang: bool,
    /// Delay before each fragment
    pub delay: Option<Duration>,
}

/// Error to raise from a scripted response
#[derive(Clone, Debug)]
pub enum MockFailure {
    Configuration(String),
    BadRequest(String),
    Completion(String),
}

impl MockFailure {
    fn to_error(&self) -> ChatlineError {
        match self {
            MockFailure::Configuration(m) => ChatlineError::Configuration(m.clone()),
            MockFailure::BadRequest(m) => ChatlineError::BadRequest(m.clone()),
            MockFailure::Completion(m) => ChatlineError::Completion(m.clone()),
        }
    }
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            fragments: vec!["Mock response".to_string()],
            usage: None,
            open_error: None,
            stream_error: None,
            hang: false,
            delay: None,
        }
    }
}

impl MockResponse {
    /// Stream the given fragments
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Fail before any fragment is produced
    pub fn open_error(failure: MockFailure) -> Self {
        Self {
            fragments: vec![],
            open_error: Some(failure),
            ..Default::default()
        }
    }

    /// Report usage after the fragments
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Fail after the fragments
    pub fn then_fail(mut self, failure: MockFailure) -> Self {
        self.stream_error = Some(failure);
        self
    }

    /// Stall forever after the fragments
    pub fn then_hang(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Sleep before each fragment
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Mock provider lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl MockProvider {
    /// Create a new mock provider
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            responses: Arc::new(Mutex::new(vec![MockResponse::default()])),
            call_count: Arc::new(AtomicUsize::new(0)),
            recorded_requests: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Create a mock provider with a custom name
    pub fn with_name(name: impl Into<String>) -> Self {
        let mut provider = Self::new();
        provider.name = name.into();
        provider
    }

    /// Respond with a single text
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_response(MockResponse::fragments([text.into()]))
    }

    /// Set the only response
    pub fn with_response(self, response: MockResponse) -> Self {
        self.with_responses(vec![response])
    }

    /// Queue multiple responses (returned in order, the last one repeats)
    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        {
            let mut guard = lock(&self.responses);
            *guard = responses;
        }
        self
    }

    /// Get the number of times complete() was called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Get all recorded requests
    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        lock(&self.recorded_requests).clone()
    }

    /// Get the last request made
    pub fn last_request(&self) -> Option<CompletionRequest> {
        lock(&self.recorded_requests).last().cloned()
    }

    /// Reset call count and recorded requests
    pub fn reset(&self) {
        self.call_count.store(0, Ordering::SeqCst);
        lock(&self.recorded_requests).clear();
    }

    fn next_response(&self) -> MockResponse {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst);
        let responses = lock(&self.responses);
        if responses.is_empty() {
            MockResponse::default()
        } else {
            responses[count.min(responses.len() - 1)].clone()
        }
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<FragmentStream> {
        lock(&self.recorded_requests).push(request.clone());
        request.validate()?;

        let response = self.next_response();
        if let Some(failure) = &response.open_error {
            return Err(failure.to_error());
        }

        if !request.stream && response.stream_error.is_none() && !response.hang {
            return Ok(single_response(
                &response.fragments.concat(),
                vec![],
                response.usage,
            ));
        }

        let delay = response.delay;
        let mut chunks: Vec<Result<RawChunk>> = response
            .fragments
            .into_iter()
            .map(|f| Ok(RawChunk::Text(f)))
            .collect();
        if let Some(usage) = response.usage {
            chunks.push(Ok(RawChunk::Usage(usage)));
        }
        if let Some(failure) = &response.stream_error {
            chunks.push(Err(failure.to_error()));
        }

        let scripted = stream::iter(chunks).then(move |chunk| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            chunk
        });

        if response.hang {
            Ok(normalize_stream(scripted.chain(stream::pending())))
        } else {
            Ok(normalize_stream(scripted))
        }
    }

    fn count_tokens(&self, messages: &[Message], _model: &str) -> Result<u32> {
        Ok(messages
            .iter()
            .map(|m| estimate_text_tokens(m.content()))
            .sum())
    }
}
