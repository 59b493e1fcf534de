// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

fn default_heartbeat_interval_s() -> u64 {
    10
}
fn default_heartbeat_deadline_s() -> u64 {
    30
}
fn default_assign_ack_timeout_s() -> u64 {
    10
}
fn default_max_assign_retries() -> u32 {
    3
}
fn default_step_timeout_s() -> u64 {
    300
}
fn default_state_ring_size() -> usize {
    256
}
fn default_log_ring_size() -> usize {
    4096
}
fn default_debug_ttl_s() -> u64 {
    1800
}
fn default_debug_extension_s() -> u64 {
    1800
}
fn default_runner_retention_s() -> u64 {
    86_400
}
fn default_runner_listen_addr() -> String {
    "127.0.0.1:7770".to_string()
}
fn default_http_listen_addr() -> String {
    "127.0.0.1:7780".to_string()
}

/// Recognized options, all with spec'd defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_heartbeat_interval_s")]
    pub heartbeat_interval_s: u64,
    #[serde(default = "default_heartbeat_deadline_s")]
    pub heartbeat_deadline_s: u64,
    #[serde(default = "default_assign_ack_timeout_s")]
    pub assign_ack_timeout_s: u64,
    #[serde(default = "default_max_assign_retries")]
    pub max_assign_retries: u32,
    #[serde(default = "default_step_timeout_s")]
    pub step_default_timeout_s: u64,
    #[serde(default = "default_state_ring_size")]
    pub event_state_ring_size: usize,
    #[serde(default = "default_log_ring_size")]
    pub event_log_ring_size: usize,
    #[serde(default = "default_debug_ttl_s")]
    pub debug_session_default_ttl_s: u64,
    #[serde(default = "default_debug_extension_s")]
    pub debug_session_extension_s: u64,
    /// Runners dead longer than this are evicted from the registry.
    #[serde(default = "default_runner_retention_s")]
    pub runner_retention_s: u64,
    /// Root of bare repositories and worktrees on disk.
    #[serde(default)]
    pub repo_storage_root: PathBuf,
    #[serde(default = "default_runner_listen_addr")]
    pub runner_listen_addr: String,
    #[serde(default = "default_http_listen_addr")]
    pub http_listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval_s: default_heartbeat_interval_s(),
            heartbeat_deadline_s: default_heartbeat_deadline_s(),
            assign_ack_timeout_s: default_assign_ack_timeout_s(),
            max_assign_retries: default_max_assign_retries(),
            step_default_timeout_s: default_step_timeout_s(),
            event_state_ring_size: default_state_ring_size(),
            event_log_ring_size: default_log_ring_size(),
            debug_session_default_ttl_s: default_debug_ttl_s(),
            debug_session_extension_s: default_debug_extension_s(),
            runner_retention_s: default_runner_retention_s(),
            repo_storage_root: PathBuf::new(),
            runner_listen_addr: default_runner_listen_addr(),
            http_listen_addr: default_http_listen_addr(),
        }
    }
}

impl Config {
    /// Parse a TOML document, filling defaults for absent keys.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a file path.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn heartbeat_deadline(&self) -> Duration {
        Duration::from_secs(self.heartbeat_deadline_s)
    }

    pub fn assign_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.assign_ack_timeout_s)
    }

    pub fn step_default_timeout(&self) -> Duration {
        Duration::from_secs(self.step_default_timeout_s)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
