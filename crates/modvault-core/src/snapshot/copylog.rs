//! Append-only JSONL log of snapshot copies
//!
//! One JSON object per line in `.copy_log.jsonl` at the root of the snapshot
//! store. Lines are only ever appended; readers skip anything they cannot
//! parse, so a torn trailing write never hides earlier history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::guard::ensure_dir;
use crate::mover::MirrorStats;

/// File name of the copy log inside the snapshot root
pub const COPY_LOG_FILE: &str = ".copy_log.jsonl";

/// Outcome of a logged copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyResult {
    Ok,
    Error,
}

/// A single copy-log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyEvent {
    pub ts: DateTime<Utc>,
    #[serde(alias = "srcRoot")]
    pub src: PathBuf,
    #[serde(alias = "destRoot")]
    pub dest: PathBuf,
    pub files: u64,
    pub bytes: u64,
    /// Wall time in milliseconds
    pub ms: u64,
    pub result: CopyResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CopyEvent {
    pub fn ok(src: &Path, dest: &Path, stats: MirrorStats, elapsed: Duration) -> Self {
        Self {
            ts: Utc::now(),
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
            files: stats.files,
            bytes: stats.bytes,
            ms: elapsed.as_millis() as u64,
            result: CopyResult::Ok,
            error: None,
        }
    }

    pub fn failed(src: &Path, dest: &Path, error: impl ToString, elapsed: Duration) -> Self {
        Self {
            ts: Utc::now(),
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
            files: 0,
            bytes: 0,
            ms: elapsed.as_millis() as u64,
            result: CopyResult::Error,
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result == CopyResult::Ok
    }
}

/// Path of the copy log for a snapshot root.
pub fn copy_log_path(root: &Path) -> PathBuf {
    root.join(COPY_LOG_FILE)
}

/// Appends one event to the log, creating the root if needed.
pub fn append_copy_event(root: &Path, event: &CopyEvent) -> Result<()> {
    ensure_dir(root)?;
    let mut line = serde_json::to_string(event)?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(copy_log_path(root))?;
    // Single write so concurrent appenders do not interleave within a line
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Reads the log, newest first.
///
/// With `since`, only events younger than that are returned. A missing log is
/// an empty history.
pub fn read_copy_events(root: &Path, since: Option<Duration>) -> Result<Vec<CopyEvent>> {
    let file = match File::open(copy_log_path(root)) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let cutoff = since
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .map(|d| Utc::now() - d);

    let mut events = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!("Stopping copy log read at unreadable line: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<CopyEvent>(line) {
            Ok(event) => {
                if cutoff.map_or(true, |cutoff| event.ts >= cutoff) {
                    events.push(event);
                }
            }
            Err(e) => tracing::debug!("Skipping malformed copy log line: {}", e),
        }
    }

    events.sort_by(|a, b| b.ts.cmp(&a.ts));
    Ok(events)
}
