pub mod checksum;
pub mod classifier;
pub mod daemon;
pub mod models;
pub mod monitor;
pub mod notifications;
pub mod orchestrator;
pub mod scan;
pub mod state;
pub mod transfer;

pub use daemon::{Daemon, copy_volume};
pub use models::{
    Digest, DriveEvent, FileFailure, FileRecord, PriorityTier, RunSummary, TierKind, TierSummary,
    Volume,
};
pub use monitor::{DriveEvents, DriveMonitor};
pub use orchestrator::Orchestrator;
pub use state::{CopyState, StateStore};
pub use transfer::{CopyEngine, NativeCopy};
