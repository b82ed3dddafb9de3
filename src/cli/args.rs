// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap

use clap::Parser;
use std::path::PathBuf;

/// Chat with hosted and local language models from your terminal
#[derive(Parser, Debug)]
#[command(name = "chatline")]
#[command(version, about = "Chat with hosted and local language models from your terminal")]
pub struct Cli {
    /// Assistant to chat with (general, dev, quick or one from settings)
    #[arg(short, long)]
    pub assistant: Option<String>,

    /// Backend to use (anthropic, groq, perplexity, local)
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Model to use
    #[arg(short, long)]
    pub model: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff
    #[arg(long)]
    pub top_p: Option<f32>,

    /// Disable streaming output
    #[arg(long)]
    pub no_stream: bool,

    /// Settings file path
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Send one prompt, print the answer and exit
    #[arg(long)]
    pub prompt: Option<String>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
