// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool-call normalization
//!
//! Backends signal tool invocations in different ways: some emit a text line
//! such as `Function call: lookup(city="Rome")`, others send structured
//! blocks. Providers feed both through this module so that callers only ever
//! see one shape, a JSON array of `{"tool_call": name, "arguments": {...}}`
//! records delivered as a single text fragment.

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{ChatlineError, Result};
use crate::llm::provider::{Fragment, FragmentStream, Usage};

/// Line prefix some backends use to announce a function call
pub const TOOL_CALL_MARKER: &str = "Function call:";

/// A normalized tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_call: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            tool_call: name.into(),
            arguments,
        }
    }
}

/// Raw provider output before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum RawChunk {
    Text(String),
    ToolCall(ToolCall),
    Usage(Usage),
}

/// Serialize tool calls as the single array fragment
pub fn encode_tool_calls(calls: &[ToolCall]) -> Result<String> {
    Ok(serde_json::to_string(calls)?)
}

/// Parse one marker line. Returns `None` if the line is not a marker line.
pub fn parse_marker_line(line: &str) -> Option<Result<ToolCall>> {
    let payload = line.trim_end_matches(['\n', '\r']).strip_prefix(TOOL_CALL_MARKER)?;
    Some(parse_call(payload.trim()))
}

/// Parse `name(args)` where args is a JSON object or `key=value` pairs
pub fn parse_call(payload: &str) -> Result<ToolCall> {
    let (name, rest) = payload
        .split_once('(')
        .ok_or_else(|| ChatlineError::ToolParse(format!("missing '(' in {:?}", payload)))?;

    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(ChatlineError::ToolParse(format!(
            "invalid function name {:?}",
            name
        )));
    }

    let args = rest
        .trim_end()
        .strip_suffix(')')
        .ok_or_else(|| ChatlineError::ToolParse(format!("missing ')' in {:?}", payload)))?;

    Ok(ToolCall::new(name, parse_arguments(args)?))
}

fn parse_arguments(args: &str) -> Result<serde_json::Value> {
    let args = args.trim();
    if args.is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }

    if args.starts_with('{') {
        return match serde_json::from_str::<serde_json::Value>(args) {
            Ok(value @ serde_json::Value::Object(_)) => Ok(value),
            Ok(other) => Err(ChatlineError::ToolParse(format!(
                "arguments must be an object, got {}",
                other
            ))),
            Err(e) => Err(ChatlineError::ToolParse(format!(
                "invalid JSON arguments: {}",
                e
            ))),
        };
    }

    let mut map = serde_json::Map::new();
    for pair in split_top_level(args) {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            ChatlineError::ToolParse(format!("expected key=value, got {:?}", pair))
        })?;
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(ChatlineError::ToolParse(format!(
                "invalid argument name {:?}",
                key
            )));
        }
        let value: serde_json::Value = serde_json::from_str(value.trim()).map_err(|e| {
            ChatlineError::ToolParse(format!("invalid value for {}: {}", key, e))
        })?;
        map.insert(key.to_string(), value);
    }
    Ok(serde_json::Value::Object(map))
}

/// Split on commas that are not inside quotes or brackets
fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Normalize a complete (non-streamed) response.
///
/// If the text announces any tool call, or the backend sent structured calls,
/// the result is only the JSON array. A malformed marker degrades to the
/// original text.
pub fn normalize_complete(text: &str, native: Vec<ToolCall>) -> String {
    let mut calls = native;
    for line in text.lines() {
        match parse_marker_line(line) {
            Some(Ok(call)) => calls.push(call),
            Some(Err(e)) => {
                tracing::warn!(target: "chatline.provider", error = %e, "tool call degraded to text");
                return text.to_string();
            }
            None => {}
        }
    }

    if calls.is_empty() {
        return text.to_string();
    }
    match encode_tool_calls(&calls) {
        Ok(encoded) => encoded,
        Err(e) => {
            tracing::warn!(target: "chatline.provider", error = %e, "failed to encode tool calls");
            text.to_string()
        }
    }
}

/// Incremental normalizer for streamed text.
///
/// Ordinary text is released as soon as it cannot be the start of a marker
/// line. Marker lines are held until they end, then parsed. Parsed calls are
/// released as one array when the stream finishes.
#[derive(Debug, Default)]
pub struct ToolCallNormalizer {
    /// Start of the current line, held while it could still be a marker
    line: String,
    /// Current line is known to be ordinary text
    passthrough: bool,
    calls: Vec<ToolCall>,
}

impl ToolCallNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns text that can be shown now
    pub fn push(&mut self, chunk: &str) -> Option<String> {
        let mut out = String::new();

        for piece in chunk.split_inclusive('\n') {
            let ends_line = piece.ends_with('\n');

            if self.passthrough {
                out.push_str(piece);
            } else {
                self.line.push_str(piece);
                let body = self.line.trim_end_matches(['\n', '\r']);
                let is_marker = body.starts_with(TOOL_CALL_MARKER);
                let could_be_marker = is_marker || TOOL_CALL_MARKER.starts_with(body);

                if is_marker && ends_line {
                    self.finish_marker_line(&mut out);
                } else if !could_be_marker || (ends_line && !is_marker) {
                    out.push_str(&self.line);
                    self.line.clear();
                    self.passthrough = !ends_line;
                }
            }

            if ends_line {
                self.passthrough = false;
            }
        }

        (!out.is_empty()).then_some(out)
    }

    /// Record a structured call sent by the backend
    pub fn push_native(&mut self, call: ToolCall) {
        self.calls.push(call);
    }

    /// Flush held text and the tool-call array, in that order
    pub fn finish(mut self) -> Vec<String> {
        let mut fragments = Vec::new();

        let mut tail = String::new();
        if !self.line.is_empty() {
            if self.line.starts_with(TOOL_CALL_MARKER) {
                self.finish_marker_line(&mut tail);
            } else {
                tail = std::mem::take(&mut self.line);
            }
        }
        if !tail.is_empty() {
            fragments.push(tail);
        }

        if !self.calls.is_empty() {
            match encode_tool_calls(&self.calls) {
                Ok(encoded) => fragments.push(encoded),
                Err(e) => {
                    tracing::warn!(target: "chatline.provider", error = %e, "failed to encode tool calls")
                }
            }
        }
        fragments
    }

    /// Flush after the stream failed. A held line is surfaced as raw text,
    /// even when it started a marker, since it may never have been completed.
    pub fn abandon(mut self) -> Vec<String> {
        let mut fragments = Vec::new();
        let held = std::mem::take(&mut self.line);
        if !held.is_empty() {
            fragments.push(held);
        }
        fragments.extend(self.finish());
        fragments
    }

    fn finish_marker_line(&mut self, out: &mut String) {
        let line = std::mem::take(&mut self.line);
        match parse_marker_line(&line) {
            Some(Ok(call)) => self.calls.push(call),
            Some(Err(e)) => {
                tracing::warn!(target: "chatline.provider", error = %e, "tool call degraded to text");
                out.push_str(&line);
            }
            None => out.push_str(&line),
        }
    }
}

/// Turn a raw provider stream into normalized fragments.
///
/// Usage is held back and emitted last so it stays the terminal fragment.
pub fn normalize_stream<S>(raw: S) -> FragmentStream
where
    S: Stream<Item = Result<RawChunk>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut raw = Box::pin(raw);
        let mut normalizer = ToolCallNormalizer::new();
        let mut usage = None;

        while let Some(item) = raw.next().await {
            match item {
                Ok(RawChunk::Text(text)) => {
                    if let Some(out) = normalizer.push(&text) {
                        yield Ok(Fragment::Text(out));
                    }
                }
                Ok(RawChunk::ToolCall(call)) => normalizer.push_native(call),
                Ok(RawChunk::Usage(reported)) => usage = Some(reported),
                Err(e) => {
                    for text in normalizer.abandon() {
                        yield Ok(Fragment::Text(text));
                    }
                    yield Err(e);
                    return;
                }
            }
        }

        for text in normalizer.finish() {
            yield Ok(Fragment::Text(text));
        }
        if let Some(usage) = usage {
            yield Ok(Fragment::Usage(usage));
        }
    })
}

/// Build the single-fragment stream for a non-streamed response
pub fn single_response(text: &str, native: Vec<ToolCall>, usage: Option<Usage>) -> FragmentStream {
    let mut fragments = vec![Ok(Fragment::Text(normalize_complete(text, native)))];
    if let Some(usage) = usage {
        fragments.push(Ok(Fragment::Usage(usage)));
    }
    Box::pin(futures::stream::iter(fragments))
}
