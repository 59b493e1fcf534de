// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: paths, startup, recovery, shutdown.

use fs2::FileExt;
use laf_bus::EventBus;
use laf_core::{Config as CoreConfig, RepoId, SystemClock};
use laf_engine::{Engine, EngineDeps};
use laf_git::GitStore;
use laf_storage::{Database, LogStore};
use rand::RngCore;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// How often the engine's tick loop fires.
const TICK_PERIOD: Duration = Duration::from_millis(500);

/// Daemon configuration: resolved paths plus the core options.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/laf)
    pub state_dir: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to daemon log file directory
    pub log_dir: PathBuf,
    /// Path to the SQLite database
    pub db_path: PathBuf,
    /// Path to durable step logs
    pub step_logs_path: PathBuf,
    /// Path to the persisted boot secret (clone-token minting)
    pub secret_path: PathBuf,
    /// Core engine options
    pub core: CoreConfig,
}

impl Config {
    /// Resolve configuration: state dir from `LAF_STATE_DIR` or
    /// `~/.local/state/laf`, options from `laf.toml` (or `LAF_CONFIG`)
    /// with environment overrides for the listen addresses.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = match std::env::var_os("LAF_STATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::state_dir()
                .or_else(dirs::data_local_dir)
                .ok_or(LifecycleError::NoStateDir)?
                .join("laf"),
        };

        let config_path = match std::env::var_os("LAF_CONFIG") {
            Some(path) => PathBuf::from(path),
            None => state_dir.join("laf.toml"),
        };
        let mut core = if config_path.exists() {
            CoreConfig::load(&config_path)?
        } else {
            CoreConfig::default()
        };

        if core.repo_storage_root.as_os_str().is_empty() {
            core.repo_storage_root = state_dir.join("repos");
        }
        if let Ok(addr) = std::env::var("LAF_HTTP_ADDR") {
            core.http_listen_addr = addr;
        }
        if let Ok(addr) = std::env::var("LAF_RUNNER_ADDR") {
            core.runner_listen_addr = addr;
        }

        Ok(Self {
            lock_path: state_dir.join("daemon.pid"),
            log_dir: state_dir.join("log"),
            db_path: state_dir.join("laf.db"),
            step_logs_path: state_dir.join("logs"),
            secret_path: state_dir.join("secret"),
            state_dir,
            core,
        })
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind {0}: {1}")]
    BindFailed(String, std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] laf_core::config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] laf_storage::StorageError),

    #[error("Git error: {0}")]
    Git(#[from] laf_git::GitError),

    #[error("Engine error: {0}")]
    Engine(#[from] laf_engine::EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Running daemon state.
pub struct DaemonState {
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub engine: Arc<Engine<SystemClock>>,
    pub boot_secret: String,
}

/// Result of daemon startup: the state plus the two listeners, which
/// move into their accept loops.
pub struct StartupResult {
    pub daemon: DaemonState,
    pub runner_listener: TcpListener,
    pub http_listener: TcpListener,
}

/// Start the daemon: lock, storage, repo verification, executor
/// recovery, listeners.
pub async fn startup(config: Config) -> Result<StartupResult, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    // Acquire the lock first so a second daemon never touches state.
    // OpenOptions avoids truncating the running daemon's PID before
    // the lock is held.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    {
        use std::io::Write;
        let mut lock_file = &lock_file;
        lock_file.set_len(0)?;
        writeln!(lock_file, "{}", std::process::id())?;
    }

    let boot_secret = load_or_mint_secret(&config.secret_path)?;

    let db = Arc::new(Database::open(&config.db_path)?);
    let logs = Arc::new(LogStore::new(config.step_logs_path.clone()));
    let git = Arc::new(GitStore::new(config.core.repo_storage_root.clone()));
    let bus = Arc::new(EventBus::new(
        config.core.event_state_ring_size,
        config.core.event_log_ring_size,
    ));

    // Re-open and verify every known repository; the directory tree is
    // the source of truth for git state.
    for repo in db.list_repos()? {
        match git.open_repo(&repo.id, &repo.default_branch) {
            Ok(_) => match git.sync_from_disk(&repo.id).await {
                Ok(report) => {
                    let damaged = report.branches.iter().filter(|b| b.damaged).count();
                    if damaged > 0 || !report.pruned.is_empty() {
                        warn!(
                            repo = %repo.id,
                            damaged,
                            pruned = report.pruned.len(),
                            "repository verification found problems"
                        );
                    }
                }
                Err(e) => warn!(repo = %repo.id, error = %e, "repository verification failed"),
            },
            Err(e) => {
                warn!(repo = %repo.id, error = %e, "repository missing on disk");
            }
        }
    }

    let http_base = format!("http://{}", config.core.http_listen_addr);
    let engine = Engine::new(EngineDeps {
        config: config.core.clone(),
        clock: SystemClock,
        db,
        logs,
        git,
        bus,
        http_base,
    });

    // Rebuild frontiers for runs that were mid-flight at shutdown.
    let resumed = engine.recover().await?;
    if resumed > 0 {
        info!(resumed, "resumed non-terminal runs");
    }

    engine.spawn_tick_loop(TICK_PERIOD);

    let runner_listener = TcpListener::bind(config.core.runner_listen_addr.as_str())
        .await
        .map_err(|e| LifecycleError::BindFailed(config.core.runner_listen_addr.clone(), e))?;
    let http_listener = TcpListener::bind(config.core.http_listen_addr.as_str())
        .await
        .map_err(|e| LifecycleError::BindFailed(config.core.http_listen_addr.clone(), e))?;

    info!(
        runner_addr = %config.core.runner_listen_addr,
        http_addr = %config.core.http_listen_addr,
        state_dir = %config.state_dir.display(),
        "daemon ready"
    );

    Ok(StartupResult {
        daemon: DaemonState {
            config,
            lock_file,
            engine,
            boot_secret,
        },
        runner_listener,
        http_listener,
    })
}

impl DaemonState {
    /// Graceful shutdown: release the lock and pid file. Connected
    /// runners notice the closed channel and re-register on restart;
    /// non-terminal runs resume from persisted state.
    pub fn shutdown(&self) {
        info!("shutting down daemon");
        if self.config.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.lock_path) {
                warn!(error = %e, "failed to remove PID file");
            }
        }
        info!("daemon shutdown complete");
    }

    /// Mint the clone token a new repo will embed in its URLs.
    pub fn mint_clone_token(&self, repo_id: &RepoId) -> String {
        Engine::<SystemClock>::mint_clone_token(repo_id, &self.boot_secret)
    }
}

/// The boot secret persists across restarts so minted clone URLs stay
/// stable.
fn load_or_mint_secret(path: &std::path::Path) -> Result<String, LifecycleError> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim().to_string();
        if !trimmed.is_empty() {
            return Ok(trimmed);
        }
    }
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let secret: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    std::fs::write(path, &secret)?;
    Ok(secret)
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
