// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Command handling for the chat session
//!
//! Commands are exact, case-sensitive tokens. Anything else is a message.

pub const COMMAND_CLEAR: &[&str] = &[":clear", ":c"];
pub const COMMAND_QUIT: &[&str] = &[":quit", ":q"];
pub const COMMAND_RERUN: &[&str] = &[":rerun", ":r"];
pub const COMMAND_HELP: &[&str] = &[":help", ":h", ":?"];

/// Static help text shown for `:help`
pub const COMMANDS_HELP: &str = "
Commands:
- `:clear` / `:c` - Clear the conversation.
- `:quit` / `:q` / Ctrl+D - Quit the program.
- `:rerun` / `:r` - Re-run the last message.
- `:help` / `:h` / `:?` - Show this help message.
- Ctrl+C while a response is streaming stops it and keeps what arrived.
- Append `--name value` to a message to override a parameter for that turn.
";

/// Represents the different inputs the session reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Reset the transcript
    Clear,
    /// Leave the loop
    Quit,
    /// Re-run the last user turn
    Rerun,
    /// Show help information
    Help,
    /// Regular user message (not a command)
    Message(String),
}

/// Parse user input into a ChatCommand
pub fn parse_command(input: &str) -> ChatCommand {
    if COMMAND_QUIT.contains(&input) {
        ChatCommand::Quit
    } else if COMMAND_CLEAR.contains(&input) {
        ChatCommand::Clear
    } else if COMMAND_RERUN.contains(&input) {
        ChatCommand::Rerun
    } else if COMMAND_HELP.contains(&input) {
        ChatCommand::Help
    } else {
        ChatCommand::Message(input.to_string())
    }
}

/// Every command alias
pub fn all_commands() -> impl Iterator<Item = &'static str> {
    COMMAND_CLEAR
        .iter()
        .chain(COMMAND_QUIT)
        .chain(COMMAND_RERUN)
        .chain(COMMAND_HELP)
        .copied()
}
