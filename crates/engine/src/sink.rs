// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound seam to a connected runner.
//!
//! The transport layer (TCP listener in the daemon, in-memory duplex in
//! tests) implements [`RunnerSink`]; the registry and dispatcher only
//! ever see the trait.

use async_trait::async_trait;
use laf_core::ServerMsg;
use thiserror::Error;

/// Failure to hand a frame to a runner's connection.
#[derive(Debug, Error)]
#[error("runner channel closed: {0}")]
pub struct SinkError(pub String);

/// Write half of one runner's duplex channel.
#[async_trait]
pub trait RunnerSink: Send + Sync + std::fmt::Debug {
    async fn send(&self, msg: ServerMsg) -> Result<(), SinkError>;
}

/// Sink over a tokio mpsc queue, used by the daemon's connection
/// writer task and by in-process tests.
#[derive(Debug)]
pub struct ChannelSink {
    tx: tokio::sync::mpsc::Sender<ServerMsg>,
}

impl ChannelSink {
    pub fn new(tx: tokio::sync::mpsc::Sender<ServerMsg>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl RunnerSink for ChannelSink {
    async fn send(&self, msg: ServerMsg) -> Result<(), SinkError> {
        self.tx
            .send(msg)
            .await
            .map_err(|e| SinkError(e.to_string()))
    }
}
