// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Helpers shared by the HTTP backends

use futures::{Stream, StreamExt};

use crate::error::{ChatlineError, Result};

/// Rough token estimate: ~4 characters per token for English
pub fn estimate_text_tokens(text: &str) -> u32 {
    (text.len() as f64 / 4.0).ceil() as u32
}

/// Pull a human-readable message out of an error body.
///
/// Hosted backends wrap it as `{"error": {"message": ...}}`; anything else is
/// passed through as-is.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["error"].as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Turn a failed HTTP response into a chatline error
pub(crate) async fn response_error(response: reqwest::Response) -> ChatlineError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(target: "chatline.provider", status, body = %body, "backend returned error");
    ChatlineError::from_status(status, error_message(&body))
}

/// One server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Accumulates raw bytes and splits complete events on blank lines.
///
/// Bytes are only decoded once an event is complete, so a multi-byte
/// character split across network reads is reassembled first.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    buffer: Vec<u8>,
}

impl SseBuffer {
    pub fn push(&mut self, chunk: impl AsRef<[u8]>) -> Vec<SseEvent> {
        // CRLF line endings collapse to LF
        self.buffer
            .extend(chunk.as_ref().iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let raw: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_sse_event(&String::from_utf8_lossy(&raw[..pos])) {
                events.push(event);
            }
        }
        events
    }

    /// Parse whatever is left once the connection closes
    pub fn finish(self) -> Option<SseEvent> {
        parse_sse_event(String::from_utf8_lossy(&self.buffer).trim())
    }
}

fn parse_sse_event(raw: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

/// Decode a streaming HTTP body into server-sent events
pub(crate) fn sse_events(response: reqwest::Response) -> impl Stream<Item = Result<SseEvent>> + Send {
    let bytes = response.bytes_stream();

    async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer = SseBuffer::default();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for event in buffer.push(&chunk) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(ChatlineError::Completion(format!("stream interrupted: {}", e)));
                    return;
                }
            }
        }

        if let Some(event) = buffer.finish() {
            yield Ok(event);
        }
    }
}
