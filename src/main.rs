// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! chatline - chat with language models from your terminal
//!
//! Entry point for the chatline CLI application.

use anyhow::Context;
use clap::Parser;

use chatline::chat::{Assistant, ChatSession, InterruptHandle};
use chatline::cli::{parse_args, Cli, ConsoleInput, ConsoleListener};
use chatline::config::{AssistantConfig, Settings};
use chatline::llm::factory::ProviderFactory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    // `-v` turns on the session and provider diagnostics; `RUST_LOG` still applies.
    if cli.verbose > 0 {
        for directive in ["chatline.session=debug", "chatline.provider=debug"] {
            if let Ok(parsed) = directive.parse() {
                env_filter = env_filter.add_directive(parsed);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::load().context("failed to load settings")?,
    };

    let (assistant_name, assistant_config) = settings.assistant(cli.assistant.as_deref())?;
    let assistant_config = apply_cli_overrides(assistant_config, &cli);
    let mut defaults = settings.defaults.clone();
    defaults.stream = defaults.stream && !cli.no_stream;

    let factory = ProviderFactory::new(settings);
    let provider_name = factory.resolve_provider_name(
        cli.provider
            .as_deref()
            .or(assistant_config.provider.as_deref()),
    );
    tracing::debug!(
        target: "chatline.session",
        assistant = %assistant_name,
        provider = %provider_name,
        "starting chat"
    );

    let provider = factory.create(&provider_name)?;
    let assistant = Assistant::from_config(provider, &assistant_config, &defaults);
    let mut session = ChatSession::new(assistant, ConsoleListener::stdout());
    spawn_interrupt_listener(session.interrupt_handle());

    let result = match cli.prompt.as_deref() {
        Some(prompt) => {
            let (text, overrides) = parse_args(prompt);
            session.process_input(&text, overrides).await.map(|_| ())
        }
        None => session.run(&mut ConsoleInput::stdin()).await,
    };

    factory.shutdown();
    result?;
    Ok(())
}

/// Command-line values win over the assistant's own settings
fn apply_cli_overrides(mut config: AssistantConfig, cli: &Cli) -> AssistantConfig {
    if let Some(model) = &cli.model {
        config.model = Some(model.clone());
    }
    if let Some(temperature) = cli.temperature {
        config.temperature = Some(temperature);
    }
    if let Some(top_p) = cli.top_p {
        config.top_p = Some(top_p);
    }
    config
}

/// Ctrl+C stops the response being streamed instead of killing the process
fn spawn_interrupt_listener(handle: InterruptHandle) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !handle.interrupt() {
                eprintln!("\n(use :quit or Ctrl+D to exit)");
            }
        }
    });
}
