//! Long-running loop: wait for a volume, copy it, journal the run, repeat.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::{self, DriveEnumerator};
use crate::context::AppContext;
use crate::core::models::{DriveEvent, RunSummary, Volume};
use crate::core::monitor::DriveMonitor;
use crate::db::runs::{self, RunStatus};
use crate::error::RunError;

pub struct Daemon {
    ctx: AppContext,
    enumerator: Arc<dyn DriveEnumerator>,
    cancel: CancellationToken,
}

impl Daemon {
    pub fn new(ctx: AppContext, enumerator: Arc<dyn DriveEnumerator>) -> Self {
        Self {
            ctx,
            enumerator,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the daemon once the current run (if any) finishes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        info!(
            destination = %self.ctx.config.destination_directory.display(),
            concurrency = self.ctx.config.concurrency,
            "fcad daemon starting"
        );

        let mut events = DriveMonitor::from_config(self.enumerator.clone(), &self.ctx.config.monitor)
            .with_cancellation(self.cancel.clone())
            .watch();

        // The next event is only requested after the run finishes, so
        // at most one run is ever active.
        while let Some(event) = events.next().await {
            self.handle_drive_event(event).await;
        }

        info!("fcad daemon stopped");
        Ok(())
    }

    async fn handle_drive_event(&self, event: DriveEvent) {
        let volume = &event.volume;

        match adapters::disk_space(&volume.root) {
            Ok(space) => info!(
                root = %volume.root.display(),
                label = %volume.label,
                device = %volume.device,
                total_bytes = space.total_bytes,
                used_bytes = space.used_bytes,
                "Drive ready"
            ),
            Err(e) => warn!(root = %volume.root.display(), error = %e, "Could not read drive capacity"),
        }

        if let Err(e) = copy_volume(&self.ctx, volume).await {
            error!(root = %volume.root.display(), error = %e, "Copy run did not complete");
        }
    }
}

/// Run the orchestrator over one volume and journal the outcome.
///
/// Journal failures are logged; they never change the result.
pub async fn copy_volume(ctx: &AppContext, volume: &Volume) -> Result<RunSummary, RunError> {
    let result = ctx.orchestrator.run(volume).await;

    let journaled = match &result {
        Ok(summary) => Some((summary, RunStatus::Completed, None)),
        Err(RunError::DriveUnavailable {
            reason, partial, ..
        }) => Some((&**partial, RunStatus::Aborted, Some(reason.clone()))),
        Err(RunError::Other(_)) => None,
    };

    if let Some((summary, status, reason)) = journaled {
        if let Err(e) = runs::record(&ctx.db, summary, status, reason).await {
            warn!(run_id = %summary.run_id, error = %e, "Failed to journal run");
        }
    }

    result
}
