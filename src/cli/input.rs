// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Console input with inline override arguments
//!
//! `tell me a joke --temperature 1.2 --model=sonar` becomes the message
//! `tell me a joke` with two overrides.

use async_trait::async_trait;
use crossterm::{
    style::{Color, ResetColor, SetForegroundColor},
    ExecutableCommand,
};
use regex::Regex;
use std::io::{self, Write};
use std::sync::OnceLock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::chat::commands::COMMAND_QUIT;
use crate::chat::UserInputProvider;
use crate::error::Result;
use crate::llm::ModelOverrides;

fn arg_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"--(\w+)(?:\s+|=)(\S+)").unwrap())
}

/// Run of `--name value` pairs that ends the line
fn trailing_args_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?:(?:^|\s)--\w+(?:\s+|=)\S+)+\s*$").unwrap())
}

/// Split trailing `--name value` pairs off a line of input.
///
/// Only pairs at the end of the line count, so `--flag` inside the message
/// is left alone. Numeric values become JSON numbers, everything else stays
/// a string.
pub fn parse_args(input: &str) -> (String, ModelOverrides) {
    let Some(tail) = trailing_args_pattern().find(input) else {
        return (input.trim().to_string(), ModelOverrides::new());
    };

    let overrides = arg_pattern()
        .captures_iter(tail.as_str())
        .map(|caps| (caps[1].to_string(), parse_value(&caps[2])))
        .collect();

    (input[..tail.start()].trim().to_string(), overrides)
}

fn parse_value(raw: &str) -> serde_json::Value {
    if let Ok(int) = raw.parse::<i64>() {
        return int.into();
    }
    match raw.parse::<f64>() {
        Ok(float) if float.is_finite() => float.into(),
        _ => raw.into(),
    }
}

/// Reads user turns from a line-oriented reader, stdin by default
pub struct ConsoleInput<R = BufReader<Stdin>> {
    lines: Lines<R>,
    show_prompt: bool,
}

impl ConsoleInput {
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> ConsoleInput<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            show_prompt: true,
        }
    }

    pub fn with_prompt(mut self, show_prompt: bool) -> Self {
        self.show_prompt = show_prompt;
        self
    }

    fn print_prompt(&self) -> Result<()> {
        if !self.show_prompt {
            return Ok(());
        }
        let mut stdout = io::stdout();
        stdout.execute(SetForegroundColor(Color::Green))?;
        print!("> ");
        stdout.execute(ResetColor)?;
        stdout.flush()?;
        Ok(())
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> UserInputProvider for ConsoleInput<R> {
    async fn get_user_input(&mut self) -> Result<(String, ModelOverrides)> {
        loop {
            self.print_prompt()?;
            let Some(line) = self.lines.next_line().await? else {
                if self.show_prompt {
                    println!();
                }
                return Ok((COMMAND_QUIT[0].to_string(), ModelOverrides::new()));
            };

            let (text, overrides) = parse_args(&line);
            if !text.is_empty() {
                return Ok((text, overrides));
            }
        }
    }
}
