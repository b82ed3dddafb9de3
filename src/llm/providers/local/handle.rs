// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Shared handle to the local model server
//!
//! Loading a model is expensive, so the server is started at most once per
//! handle. The first caller takes the init lock; everyone after that reads
//! the ready endpoint without locking.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use super::server::LlamaServer;
use crate::error::Result;

/// Where the local model comes from
#[derive(Debug, Clone, PartialEq)]
pub struct LocalModelConfig {
    /// Use an already running llama.cpp server instead of spawning one
    pub base_url: Option<String>,
    pub binary_path: PathBuf,
    pub model_path: PathBuf,
    pub port: u16,
    pub ctx_size: Option<u32>,
    pub gpu_layers: Option<i32>,
}

/// Lazily started local model server
pub struct LocalModelHandle {
    config: LocalModelConfig,
    endpoint: OnceLock<String>,
    init_lock: tokio::sync::Mutex<()>,
    server: Mutex<Option<LlamaServer>>,
}

impl LocalModelHandle {
    pub fn new(config: LocalModelConfig) -> Self {
        Self {
            config,
            endpoint: OnceLock::new(),
            init_lock: tokio::sync::Mutex::new(()),
            server: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LocalModelConfig {
        &self.config
    }

    /// Whether the endpoint has been resolved
    pub fn is_loaded(&self) -> bool {
        self.endpoint.get().is_some()
    }

    /// Resolve the server endpoint, starting the server on first use
    pub async fn acquire_once(&self) -> Result<&str> {
        if let Some(endpoint) = self.endpoint.get() {
            return Ok(endpoint.as_str());
        }

        let _guard = self.init_lock.lock().await;
        if let Some(endpoint) = self.endpoint.get() {
            return Ok(endpoint.as_str());
        }

        let endpoint = match &self.config.base_url {
            Some(url) => {
                tracing::debug!(target: "chatline.provider", url = %url, "using running llama.cpp server");
                url.trim_end_matches('/').to_string()
            }
            None => {
                let server = LlamaServer::new(self.config.clone());
                server.start().await?;
                let url = server.base_url();
                match self.server.lock() {
                    Ok(mut guard) => *guard = Some(server),
                    Err(poisoned) => *poisoned.into_inner() = Some(server),
                }
                url
            }
        };

        Ok(self.endpoint.get_or_init(|| endpoint).as_str())
    }

    /// Stop a server this handle started. The endpoint stays resolved, so
    /// later requests fail as connection errors.
    pub fn shutdown(&self) {
        let server = match self.server.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(server) = server {
            server.shutdown();
        }
    }
}

impl Drop for LocalModelHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
