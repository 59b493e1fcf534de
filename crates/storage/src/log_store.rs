// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable step logs.
//!
//! Append-only text files per step under `<root>/<run_id>/<index>.log`,
//! each line prefixed with a UTC timestamp. When a run reaches a
//! terminal state its log files are compressed to `.log.zst` and the
//! originals removed. The bus delivers live logs; these files are the
//! independent durable record that makes bus-side loss harmless.

use chrono::{SecondsFormat, Utc};
use laf_core::RunId;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// zstd level for archived logs.
const ARCHIVE_LEVEL: i32 = 3;

/// Errors from the log store.
#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Filesystem-backed step log store.
pub struct LogStore {
    root: PathBuf,
}

impl LogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.as_str())
    }

    fn log_path(&self, run_id: &RunId, step_index: u32) -> PathBuf {
        self.run_dir(run_id).join(format!("{step_index}.log"))
    }

    /// Append a batch of lines to a step's durable log.
    pub fn append(
        &self,
        run_id: &RunId,
        step_index: u32,
        lines: &[String],
    ) -> Result<(), LogStoreError> {
        if lines.is_empty() {
            return Ok(());
        }
        let dir = self.run_dir(run_id);
        std::fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(run_id, step_index))?;
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut buf = String::new();
        for line in lines {
            buf.push_str(&stamp);
            buf.push(' ');
            buf.push_str(line);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())?;
        Ok(())
    }

    /// Last `n` raw lines of a step's log (timestamps stripped).
    pub fn tail(&self, run_id: &RunId, step_index: u32, n: usize) -> Vec<String> {
        let path = self.log_path(run_id, step_index);
        let Ok(file) = File::open(&path) else {
            return Vec::new();
        };
        let mut lines: Vec<String> = BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .map(strip_timestamp)
            .collect();
        if lines.len() > n {
            lines.drain(..lines.len() - n);
        }
        lines
    }

    /// Every line of a step's log (timestamps stripped). Empty when the
    /// log was never written or already archived.
    pub fn read_all(&self, run_id: &RunId, step_index: u32) -> Vec<String> {
        self.tail(run_id, step_index, usize::MAX)
    }

    /// Compress a terminal run's logs to `.log.zst` and remove the
    /// originals. Best-effort per file; a failed file is left in place.
    pub fn archive_run(&self, run_id: &RunId) -> Result<(), LogStoreError> {
        let dir = self.run_dir(run_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("log") {
                continue;
            }
            if let Err(e) = compress_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to archive step log");
            }
        }
        Ok(())
    }

    /// Whether a step's log has been archived.
    pub fn is_archived(&self, run_id: &RunId, step_index: u32) -> bool {
        self.run_dir(run_id)
            .join(format!("{step_index}.log.zst"))
            .exists()
    }
}

fn compress_file(path: &Path) -> Result<(), LogStoreError> {
    let zst_path = {
        let mut os = path.as_os_str().to_owned();
        os.push(".zst");
        PathBuf::from(os)
    };
    let input = File::open(path)?;
    let output = File::create(&zst_path)?;
    zstd::stream::copy_encode(BufReader::new(input), output, ARCHIVE_LEVEL)?;
    std::fs::remove_file(path)?;
    Ok(())
}

/// Drop the leading RFC3339 timestamp and separating space.
fn strip_timestamp(line: String) -> String {
    match line.split_once(' ') {
        Some((stamp, rest)) if stamp.len() >= 20 && stamp.contains('T') => rest.to_string(),
        _ => line,
    }
}

#[cfg(test)]
#[path = "log_store_tests.rs"]
mod tests;
