// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Terminal rendering of session events

use crossterm::{
    style::{Color, ResetColor, SetForegroundColor},
    ExecutableCommand,
};
use std::io::{self, Write};

use crate::chat::{ChatListener, ResponseStreamer, COMMANDS_HELP};
use crate::error::ChatlineError;
use crate::llm::{Message, ModelOverrides, Usage};

/// Prints session events to stdout and errors to stderr
pub struct ConsoleListener<W: Write = io::Stdout> {
    out: W,
    color: bool,
    show_usage: bool,
}

impl ConsoleListener {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleListener<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            color: true,
            show_usage: true,
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn with_usage(mut self, show_usage: bool) -> Self {
        self.show_usage = show_usage;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn colored(&mut self, color: Color, text: &str) -> io::Result<()> {
        if self.color {
            self.out.execute(SetForegroundColor(color))?;
            write!(self.out, "{}", text)?;
            self.out.execute(ResetColor)?;
        } else {
            write!(self.out, "{}", text)?;
        }
        self.out.flush()
    }

    fn write_line(&mut self, color: Color, text: &str) {
        let result = self
            .colored(color, text)
            .and_then(|_| writeln!(self.out));
        if let Err(e) = result {
            tracing::debug!(error = %e, "console write failed");
        }
    }
}

fn print_error(error: &ChatlineError, color: bool) -> io::Result<()> {
    let mut stderr = io::stderr();
    if color {
        stderr.execute(SetForegroundColor(Color::Red))?;
    }
    writeln!(stderr, "{}", error)?;
    if color {
        stderr.execute(ResetColor)?;
    }
    Ok(())
}

/// Formats usage the way it is printed after a response
pub fn format_usage(usage: &Usage) -> String {
    let marker = if usage.estimated { "~" } else { "" };
    format!(
        "[tokens: {}{} prompt + {}{} completion = {}{}]",
        marker,
        usage.prompt_tokens,
        marker,
        usage.completion_tokens,
        marker,
        usage.total_tokens
    )
}

impl<W: Write> ChatListener for ConsoleListener<W> {
    fn on_chat_start(&mut self) {
        self.write_line(
            Color::Cyan,
            &format!("chatline v{}", env!("CARGO_PKG_VERSION")),
        );
        let hint = COMMANDS_HELP
            .lines()
            .find(|line| line.contains(":help"))
            .map(|line| line.trim_start_matches("- ").to_string())
            .unwrap_or_default();
        self.write_line(Color::DarkGrey, &hint);
    }

    fn on_chat_clear(&mut self) {
        self.write_line(Color::Cyan, "Cleared the conversation.");
    }

    fn on_chat_rerun(&mut self, success: bool) {
        if success {
            self.write_line(Color::Cyan, "Re-running the last message.");
        } else {
            self.write_line(Color::Yellow, "Nothing to re-run.");
        }
    }

    fn on_error(&mut self, error: &ChatlineError) {
        if let Err(e) = print_error(error, self.color) {
            tracing::debug!(error = %e, "console write failed");
        }
    }

    fn response_streamer(&mut self) -> Box<dyn ResponseStreamer + '_> {
        Box::new(ConsoleStreamer {
            out: &mut self.out,
            wrote: false,
        })
    }

    fn on_chat_response(
        &mut self,
        _prior_messages: &[Message],
        _response: &Message,
        _overrides: &ModelOverrides,
        usage: Option<&Usage>,
    ) {
        if let (true, Some(usage)) = (self.show_usage, usage) {
            self.write_line(Color::DarkGrey, &format_usage(usage));
        }
    }
}

/// Streams tokens to the terminal; ends the line when dropped
pub struct ConsoleStreamer<'a, W: Write> {
    out: &'a mut W,
    wrote: bool,
}

impl<W: Write> ResponseStreamer for ConsoleStreamer<'_, W> {
    fn on_next_token(&mut self, token: &str) {
        self.wrote = true;
        if write!(self.out, "{}", token)
            .and_then(|_| self.out.flush())
            .is_err()
        {
            tracing::debug!("console write failed");
        }
    }
}

impl<W: Write> Drop for ConsoleStreamer<'_, W> {
    fn drop(&mut self) {
        if self.wrote {
            let _ = writeln!(self.out);
            let _ = self.out.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener() -> ConsoleListener<Vec<u8>> {
        ConsoleListener::new(Vec::new()).with_color(false)
    }

    fn output(listener: ConsoleListener<Vec<u8>>) -> String {
        String::from_utf8(listener.into_inner()).unwrap()
    }

    #[test]
    fn test_streamer_writes_tokens_and_newline_on_drop() {
        let mut listener = listener();
        {
            let mut streamer = listener.response_streamer();
            streamer.on_next_token("Hel");
            streamer.on_next_token("lo");
        }
        assert_eq!(output(listener), "Hello\n");
    }

    #[test]
    fn test_empty_streamer_writes_nothing() {
        let mut listener = listener();
        drop(listener.response_streamer());
        assert_eq!(output(listener), "");
    }

    #[test]
    fn test_usage_printed_after_response() {
        let mut listener = listener();
        listener.on_chat_response(
            &[],
            &Message::assistant("4"),
            &ModelOverrides::new(),
            Some(&Usage::new(10, 1)),
        );
        assert_eq!(
            output(listener),
            "[tokens: 10 prompt + 1 completion = 11]\n"
        );
    }

    #[test]
    fn test_usage_hidden() {
        let mut listener = listener().with_usage(false);
        listener.on_chat_response(
            &[],
            &Message::assistant("4"),
            &ModelOverrides::new(),
            Some(&Usage::new(10, 1)),
        );
        assert_eq!(output(listener), "");
    }

    #[test]
    fn test_format_estimated_usage() {
        assert_eq!(
            format_usage(&Usage::estimated(3, 2)),
            "[tokens: ~3 prompt + ~2 completion = ~5]"
        );
    }

    #[test]
    fn test_rerun_messages() {
        let mut listener = listener();
        listener.on_chat_rerun(false);
        listener.on_chat_clear();
        let text = output(listener);
        assert!(text.contains("Nothing to re-run."));
        assert!(text.contains("Cleared"));
    }

    #[test]
    fn test_chat_start_shows_help_hint() {
        let mut listener = listener();
        listener.on_chat_start();
        let text = output(listener);
        assert!(text.starts_with("chatline v"));
        assert!(text.contains(":help"));
    }
}
