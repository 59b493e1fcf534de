// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! laf-daemon: the LazyAF control-plane process.
//!
//! Hosts the runner listener (length-prefixed JSON over TCP), the HTTP
//! surface for the UI collaborator (REST + WebSocket event stream +
//! SSE log stream + git smart-HTTP), and the daemon lifecycle.

pub mod http;
pub mod lifecycle;
pub mod protocol_wire;
pub mod runner_listener;

pub use lifecycle::{Config as DaemonConfig, DaemonState, LifecycleError};
