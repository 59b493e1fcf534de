// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner listener: one persistent duplex TCP connection per runner.
//!
//! Handshake: the runner's first frame is `Hello`; registration either
//! admits (or revives) the runner or rejects a duplicate id, closing
//! the connection. After the handshake a writer task drains the
//! engine's outbound queue while the read loop feeds inbound frames to
//! the engine. Either side may ping; every inbound frame counts as a
//! heartbeat.

use crate::protocol_wire::{self, ProtocolError};
use laf_core::{Clock, RunnerId, ServerMsg};
use laf_engine::{ChannelSink, Engine};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Outbound queue depth per runner connection.
const OUTBOUND_QUEUE: usize = 64;

/// Accept loop over the runner listen address.
pub async fn run<C: Clock>(listener: TcpListener, engine: Arc<Engine<C>>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "runner connection accepted");
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    if let Err(e) = handle_connection(reader, writer, engine).await {
                        match e {
                            ProtocolError::ConnectionClosed => debug!(%peer, "runner disconnected"),
                            _ => warn!(%peer, error = %e, "runner connection error"),
                        }
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "accept error");
            }
        }
    }
}

/// Drive one runner connection from handshake to close.
///
/// Split out from the accept loop so tests can run it over an
/// in-memory duplex stream.
pub async fn handle_connection<C, R, W>(
    mut reader: R,
    writer: W,
    engine: Arc<Engine<C>>,
) -> Result<(), ProtocolError>
where
    C: Clock,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let hello = protocol_wire::read_hello(&mut reader).await?;

    let (out_tx, out_rx) = mpsc::channel::<ServerMsg>(OUTBOUND_QUEUE);
    let sink = Arc::new(ChannelSink::new(out_tx.clone()));

    let runner = match engine.on_runner_connected(hello, sink) {
        Ok(runner) => runner,
        Err(e) => {
            warn!(error = %e, "registration rejected");
            return Ok(());
        }
    };
    let runner_id = runner.id.clone();
    info!(runner = %runner_id, "runner channel established");

    let ping_interval = Duration::from_secs(engine.config().heartbeat_interval_s);
    let writer_task = tokio::spawn(write_loop(writer, out_rx, out_tx, ping_interval));

    let result = read_loop(&mut reader, &engine, &runner_id).await;

    engine.on_runner_disconnected(&runner_id).await;
    writer_task.abort();
    result
}

/// Feed inbound frames to the engine until the channel closes.
async fn read_loop<C: Clock, R: AsyncRead + Unpin>(
    reader: &mut R,
    engine: &Arc<Engine<C>>,
    runner_id: &RunnerId,
) -> Result<(), ProtocolError> {
    loop {
        let msg = match protocol_wire::read_runner_msg(reader).await {
            Ok(msg) => msg,
            Err(ProtocolError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };
        engine.on_runner_msg(runner_id, msg).await;
    }
}

/// Drain outbound frames and interleave periodic pings.
async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::Receiver<ServerMsg>,
    ping_tx: mpsc::Sender<ServerMsg>,
    ping_interval: Duration,
) {
    let mut ping_seq = 0u64;
    let mut interval = tokio::time::interval(ping_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick completes immediately; skip it.
    interval.tick().await;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = protocol_wire::write_server_msg(&mut writer, &msg).await {
                    debug!(error = %e, "runner write failed");
                    break;
                }
            }
            _ = interval.tick() => {
                ping_seq += 1;
                // Queued like any other frame to preserve ordering.
                if ping_tx.try_send(ServerMsg::Ping { seq: ping_seq }).is_err() {
                    // Queue full: the connection is congested; the
                    // heartbeat deadline will judge it.
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "runner_listener_tests.rs"]
mod tests;
