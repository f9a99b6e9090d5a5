//! Error taxonomy for the copy engine.
//!
//! File-scoped errors (`Io`, `Verification`) are collected into the run summary.
//! `DriveUnavailable` aborts a run, `StateCorruption` is recovered by starting
//! from an empty state, and `Configuration` refuses to start at all.

use std::path::PathBuf;

use crate::core::models::{Digest, RunSummary};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("verification failed for {}: expected {expected}, found {actual}", path.display())]
    Verification {
        path: PathBuf,
        expected: Digest,
        actual: Digest,
    },

    #[error("drive at {} is unavailable: {reason}", root.display())]
    DriveUnavailable { root: PathBuf, reason: String },

    #[error("state file {} is corrupt: {reason}", path.display())]
    StateCorruption { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("notification delivery failed: {0}")]
    Notification(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-friendly name, used in summaries and the run journal.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Verification { .. } => "verification",
            Self::DriveUnavailable { .. } => "drive_unavailable",
            Self::StateCorruption { .. } => "state_corruption",
            Self::Configuration(_) => "configuration",
            Self::Notification(_) => "notification",
        }
    }
}

/// Run-scoped failure returned by [`crate::core::Orchestrator::run`].
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The volume vanished before or during the run. Anything recorded before
    /// that point stays recorded; `partial` shows how far the run got.
    #[error("drive at {} became unavailable: {reason}", root.display())]
    DriveUnavailable {
        root: PathBuf,
        reason: String,
        partial: Box<RunSummary>,
    },

    #[error(transparent)]
    Other(#[from] Error),
}
