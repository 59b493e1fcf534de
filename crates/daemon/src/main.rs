// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `lafd` — the LazyAF control-plane daemon.

use laf_daemon::{http, lifecycle, runner_listener};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(log_dir: &std::path::Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_env("LAF_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, "lafd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let config = match lifecycle::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("lafd: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let _log_guard = init_tracing(&config.log_dir);

    let startup = match lifecycle::startup(config).await {
        Ok(startup) => startup,
        Err(e) => {
            error!(error = %e, "startup failed");
            eprintln!("lafd: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };
    let daemon = Arc::new(startup.daemon);

    // Runner duplex channel listener
    {
        let engine = Arc::clone(&daemon.engine);
        tokio::spawn(runner_listener::run(startup.runner_listener, engine));
    }

    // HTTP surface for the UI collaborator
    {
        let app = http::build_router(http::AppState::new(
            Arc::clone(&daemon.engine),
            daemon.boot_secret.clone(),
        ));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(startup.http_listener, app).await {
                error!(error = %e, "http server exited");
            }
        });
    }

    info!("lafd running; ctrl-c to stop");
    tokio::signal::ctrl_c().await.ok();
    daemon.shutdown();
    std::process::ExitCode::SUCCESS
}
