// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! llama.cpp server process
//!
//! Spawns `llama-server` bound to loopback and waits for `/health` before the
//! provider sends its first `/completion` request.

use std::ffi::OsString;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::Instant;

use super::handle::LocalModelConfig;
use crate::error::{ChatlineError, Result};

pub const DEFAULT_PORT: u16 = 8847;
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(120);

/// A running (or not yet started) llama-server child process
pub struct LlamaServer {
    config: LocalModelConfig,
    child: Mutex<Option<Child>>,
}

impl LlamaServer {
    pub fn new(config: LocalModelConfig) -> Self {
        Self {
            config,
            child: Mutex::new(None),
        }
    }

    /// Command line passed to the binary
    pub fn launch_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--model".into(),
            self.config.model_path.clone().into_os_string(),
            "--host".into(),
            "127.0.0.1".into(),
            "--port".into(),
            self.config.port.to_string().into(),
        ];
        if let Some(layers) = self.config.gpu_layers {
            args.extend(["--n-gpu-layers".into(), layers.to_string().into()]);
        }
        if let Some(ctx) = self.config.ctx_size {
            args.extend(["--ctx-size".into(), ctx.to_string().into()]);
        }
        args
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.config.port)
    }

    /// Spawn the process and block until it reports healthy
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let model = &self.config.model_path;
        if !model.is_file() {
            return Err(ChatlineError::Configuration(format!(
                "local model file not found: {}",
                model.display()
            )));
        }

        let child = Command::new(&self.config.binary_path)
            .args(self.launch_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ChatlineError::Configuration(format!(
                    "failed to start llama-server at {}: {}",
                    self.config.binary_path.display(),
                    e
                ))
            })?;
        *self.lock_child() = Some(child);

        if let Err(e) = self.wait_until_healthy().await {
            self.shutdown();
            return Err(e);
        }

        tracing::info!(
            target: "chatline.provider",
            port = self.config.port,
            model = %model.display(),
            "llama-server ready"
        );
        Ok(())
    }

    async fn wait_until_healthy(&self) -> Result<()> {
        let client = reqwest::Client::new();
        let url = format!("{}/health", self.base_url());
        let deadline = Instant::now() + STARTUP_TIMEOUT;

        loop {
            if !self.is_running() {
                return Err(ChatlineError::Configuration(
                    "llama-server exited during startup".to_string(),
                ));
            }
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    tracing::debug!(target: "chatline.provider", status = %resp.status(), "llama-server loading")
                }
                Err(_) => {}
            }
            if Instant::now() >= deadline {
                return Err(ChatlineError::Configuration(format!(
                    "llama-server did not become ready within {} seconds",
                    STARTUP_TIMEOUT.as_secs()
                )));
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }

    /// Whether the child process is alive
    pub fn is_running(&self) -> bool {
        match self.lock_child().as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn shutdown(&self) {
        if let Some(mut child) = self.lock_child().take() {
            tracing::debug!(target: "chatline.provider", port = self.config.port, "stopping llama-server");
            if let Err(e) = child.start_kill() {
                tracing::warn!(target: "chatline.provider", error = %e, "failed to kill llama-server");
            }
        }
    }

    fn lock_child(&self) -> std::sync::MutexGuard<'_, Option<Child>> {
        match self.child.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for LlamaServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
