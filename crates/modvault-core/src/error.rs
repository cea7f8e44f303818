//! Error types for modvault-core

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for modvault operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A required root is unset or missing. Raised before any mutation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A computed path would leave its root.
    #[error("Unsafe path: \"{}\" is outside of base \"{}\"", .candidate.display(), .base.display())]
    PathEscape { base: PathBuf, candidate: PathBuf },

    #[error("Invalid mod name: {0:?}")]
    InvalidName(String),

    #[error(
        "Delete failed for \"{name}\": {source}. \
         This usually means the game or another process is still using the file; \
         close it and try again."
    )]
    EntryBusy {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Reconciliation finished with {}", EntryFailure::summarize(.failures))]
    Reconcile { failures: Vec<EntryFailure> },

    #[error("File watcher error: {0}")]
    Watch(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}

/// One entry that failed during a reconciliation batch.
#[derive(Debug)]
pub struct EntryFailure {
    /// Name of the mod entry.
    pub name: String,
    /// What the engine was doing when it failed.
    pub action: &'static str,
    /// Underlying error.
    pub source: Box<Error>,
}

impl EntryFailure {
    pub fn new(name: impl Into<String>, action: &'static str, source: Error) -> Self {
        Self {
            name: name.into(),
            action,
            source: Box::new(source),
        }
    }

    fn summarize(failures: &[EntryFailure]) -> String {
        let noun = if failures.len() == 1 { "entry" } else { "entries" };
        let details = failures
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        format!("{} failed {}: {}", failures.len(), noun, details)
    }
}

impl fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.action, self.source)
    }
}

/// Result type alias for modvault operations
pub type Result<T> = std::result::Result<T, Error>;
