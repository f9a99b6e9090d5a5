//! Priority-ordered, deduplicating copy of one volume.
//!
//! Tiers run strictly in rank order. Inside a tier at most `concurrency`
//! files are in flight on the blocking pool; the next tier starts only once
//! every file of the current one has been copied, skipped or failed.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::adapters;
use crate::config::RunSettings;
use crate::core::classifier::{ClassifyOptions, classify};
use crate::core::checksum;
use crate::core::models::{
    Digest, DiscoveredFile, FileFailure, FileRecord, PriorityTier, RunSummary, TierSummary, Volume,
};
use crate::core::notifications::{CopyEvent, NotificationChannel, NotificationPolicy};
use crate::core::scan::scan_volume;
use crate::core::state::StateStore;
use crate::core::transfer::{self, CopyEngine, NativeCopy, is_device_removed_error};
use crate::error::{Error, RunError};
use crate::logging::LogThrottle;

/// Upper bound on a single notification delivery.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Orchestrator {
    settings: RunSettings,
    state: StateStore,
    engine: Arc<dyn CopyEngine>,
    notifier: Option<Arc<dyn NotificationChannel>>,
    run_lock: tokio::sync::Mutex<()>,
}

/// What happened to one file.
enum FileOutcome {
    Copied(FileRecord),
    Duplicate,
    Failed(FileFailure),
    DriveGone(String),
}

/// Everything a blocking worker needs to process one file.
#[derive(Clone)]
struct FileJob {
    volume_root: PathBuf,
    tier_dir: PathBuf,
    state: StateStore,
    engine: Arc<dyn CopyEngine>,
    claims: Arc<Claims>,
}

impl Orchestrator {
    pub fn new(
        settings: RunSettings,
        state: StateStore,
        notifier: Option<Arc<dyn NotificationChannel>>,
    ) -> Self {
        Self {
            settings,
            state,
            engine: Arc::new(NativeCopy::default()),
            notifier,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the copy engine (tests use this to inject faults).
    pub fn with_engine(mut self, engine: Arc<dyn CopyEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Directory a volume's files are copied into.
    pub fn volume_destination(&self, volume: &Volume) -> PathBuf {
        self.settings
            .destination
            .join(format!("Drive_{}_copy", volume.label))
    }

    /// Copy everything new from `volume`, tier by tier.
    ///
    /// Concurrent calls are serialized: only one run touches the state store
    /// at a time.
    pub async fn run(&self, volume: &Volume) -> Result<RunSummary, RunError> {
        let _guard = self.run_lock.lock().await;

        let run_id = Uuid::now_v7().to_string();
        let span = info_span!("run", run_id = %run_id, volume = %volume.root.display());

        async {
            let destination = self.volume_destination(volume);
            let mut summary = RunSummary::new(run_id.clone(), volume, destination.clone());

            info!(destination = %destination.display(), "Starting copy run");

            let scan = match scan_volume(&volume.root, Some(&self.settings.destination)).await {
                Ok(scan) => scan,
                Err(e) => {
                    let reason = e.to_string();
                    return Err(self.abort(volume, summary, reason).await);
                }
            };

            info!(
                total_files = scan.files.len(),
                total_bytes = scan.total_bytes,
                "Scan complete"
            );

            if let Err(e) = std::fs::create_dir_all(&destination) {
                return Err(RunError::Other(Error::io(&destination, e)));
            }
            self.check_free_space(&destination, scan.total_bytes);

            let tiers = classify(
                scan.files,
                &self.settings.rules,
                ClassifyOptions {
                    enable_priority: self.settings.enable_priority,
                    include_non_priority: !self.settings.copy_only_priority_files,
                },
            );

            let policy = NotificationPolicy::from(&self.settings.notifications);
            let claims = Arc::new(Claims::default());

            for tier in &tiers {
                let job = FileJob {
                    volume_root: volume.root.clone(),
                    tier_dir: destination.join(tier.directory_name()),
                    state: self.state.clone(),
                    engine: self.engine.clone(),
                    claims: claims.clone(),
                };

                let (tier_summary, failures, drive_gone) = self
                    .process_tier(tier, job)
                    .instrument(info_span!("tier", rank = tier.rank, label = %tier.label()))
                    .await;

                let notify = policy.notify_tier(tier, &tiers);
                summary.absorb(tier_summary.clone(), failures);

                if let Some(reason) = drive_gone {
                    return Err(self.abort(volume, summary, reason).await);
                }

                if notify {
                    self.notify(CopyEvent::TierFinished {
                        run_id: run_id.clone(),
                        volume_label: volume.label.clone(),
                        tier: tier_summary,
                    })
                    .await;
                }
            }

            summary.finished_at = Some(Utc::now());

            info!(
                files_copied = summary.files_copied,
                duplicates_skipped = summary.duplicates_skipped,
                bytes_copied = summary.bytes_copied,
                failures = summary.failures.len(),
                "Copy run complete"
            );

            if policy.notify_run() {
                self.notify(CopyEvent::RunFinished {
                    summary: summary.clone(),
                })
                .await;
            }

            Ok::<RunSummary, RunError>(summary)
        }
        .instrument(span)
        .await
    }

    async fn process_tier(
        &self,
        tier: &PriorityTier,
        job: FileJob,
    ) -> (TierSummary, Vec<FileFailure>, Option<String>) {
        let mut tier_summary = TierSummary {
            rank: tier.rank,
            label: tier.label(),
            ..TierSummary::default()
        };
        let mut failures = Vec::new();
        let mut drive_gone: Option<String> = None;

        info!(files = tier.files.len(), "Starting tier");

        let throttle = LogThrottle::new(Duration::from_secs(2));
        let total = tier.files.len();
        let mut processed = 0usize;
        let mut pending = tier.files.iter().cloned();
        let mut set: JoinSet<FileOutcome> = JoinSet::new();
        let limit = self.settings.concurrency.max(1);

        loop {
            while drive_gone.is_none() && set.len() < limit {
                let Some(file) = pending.next() else { break };
                let job = job.clone();
                set.spawn_blocking(move || {
                    let path = file.path.clone();
                    panic::catch_unwind(AssertUnwindSafe(|| process_file(&job, file)))
                        .unwrap_or_else(|_| {
                            FileOutcome::Failed(FileFailure {
                                path,
                                kind: "io".to_string(),
                                message: "file worker panicked".to_string(),
                            })
                        })
                });
            }

            let Some(joined) = set.join_next().await else {
                break;
            };
            processed += 1;

            match joined {
                Ok(FileOutcome::Copied(record)) => {
                    tier_summary.files_copied += 1;
                    tier_summary.bytes_copied += record.size_bytes;
                }
                Ok(FileOutcome::Duplicate) => tier_summary.duplicates_skipped += 1,
                Ok(FileOutcome::Failed(failure)) => {
                    error!(file = %failure.path.display(), error = %failure.message, "Failed to copy file");
                    tier_summary.failures += 1;
                    failures.push(failure);
                }
                Ok(FileOutcome::DriveGone(reason)) => {
                    if drive_gone.is_none() {
                        warn!(reason = %reason, "Volume disappeared, abandoning remaining files");
                    }
                    drive_gone.get_or_insert(reason);
                }
                Err(e) => {
                    error!(error = %e, "File worker did not complete");
                    tier_summary.failures += 1;
                    failures.push(FileFailure {
                        path: PathBuf::new(),
                        kind: "io".to_string(),
                        message: format!("worker task failed: {}", e),
                    });
                }
            }

            if throttle.should_log() {
                debug!(processed, total, "Tier progress");
            }
        }

        info!(
            copied = tier_summary.files_copied,
            duplicates = tier_summary.duplicates_skipped,
            failed = tier_summary.failures,
            "Tier finished"
        );

        (tier_summary, failures, drive_gone)
    }

    fn check_free_space(&self, destination: &Path, needed: u64) {
        match adapters::disk_space(destination) {
            Ok(space) if space.available_bytes < needed => warn!(
                available_bytes = space.available_bytes,
                needed_bytes = needed,
                "Destination may not have enough free space"
            ),
            Ok(space) => debug!(available_bytes = space.available_bytes, "Destination free space"),
            Err(e) => debug!(error = %e, "Could not query destination free space"),
        }
    }

    async fn abort(&self, volume: &Volume, mut summary: RunSummary, reason: String) -> RunError {
        summary.finished_at = Some(Utc::now());
        error!(reason = %reason, files_copied = summary.files_copied, "Copy run aborted");

        if self.settings.notifications.after_all_transfers {
            self.notify(CopyEvent::RunFailed {
                run_id: summary.run_id.clone(),
                volume_label: volume.label.clone(),
                error: reason.clone(),
            })
            .await;
        }

        RunError::DriveUnavailable {
            root: volume.root.clone(),
            reason,
            partial: Box::new(summary),
        }
    }

    /// Deliver a notification. Failures are logged and never affect the run.
    async fn notify(&self, event: CopyEvent) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        match tokio::time::timeout(NOTIFY_TIMEOUT, notifier.notify(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %Error::Notification(e.to_string()), "Notification not delivered"),
            Err(_) => warn!("Notification timed out"),
        }
    }
}

/// Hash, deduplicate, copy, verify and record one file. Runs on the blocking pool.
fn process_file(job: &FileJob, file: DiscoveredFile) -> FileOutcome {
    let digest = match checksum::digest_file(&file.path) {
        Ok(digest) => digest,
        Err(e) => return failure_outcome(job, file.path, e),
    };

    if job.state.contains(&digest) {
        debug!(file = %file.path.display(), digest = %digest.short(), "Already copied, skipping");
        return FileOutcome::Duplicate;
    }

    // Waits while another worker copies the same content. Only the state
    // decides afterwards whether this file is still needed.
    let _claim = job.claims.acquire(digest);
    if job.state.contains(&digest) {
        debug!(file = %file.path.display(), digest = %digest.short(), "Copied by another worker, skipping");
        return FileOutcome::Duplicate;
    }

    match transfer::copy_verified(job.engine.as_ref(), &file.path, &job.tier_dir, &digest) {
        Ok(copy) => {
            let record = FileRecord {
                digest,
                source_path: file.path.clone(),
                destination_path: copy.destination.clone(),
                size_bytes: copy.size_bytes,
                copied_at: Utc::now(),
            };

            match job.state.record(record.clone()) {
                Ok(true) => {
                    debug!(
                        file = %file.path.display(),
                        destination = %copy.destination.display(),
                        "Copied file"
                    );
                    FileOutcome::Copied(record)
                }
                Ok(false) => {
                    let _ = std::fs::remove_file(&copy.destination);
                    FileOutcome::Duplicate
                }
                Err(e) => {
                    // Unrecorded copies would be duplicated next run.
                    let _ = std::fs::remove_file(&copy.destination);
                    FileOutcome::Failed(FileFailure::from_error(file.path, &e))
                }
            }
        }
        Err(e) => failure_outcome(job, file.path, e),
    }
}

/// Digests currently being copied within one run.
#[derive(Default)]
struct Claims {
    held: Mutex<HashSet<Digest>>,
    released: Condvar,
}

impl Claims {
    /// Block until no other worker holds `digest`, then take it.
    fn acquire(&self, digest: Digest) -> ClaimGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(&digest) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(digest);
        ClaimGuard {
            claims: self,
            digest,
        }
    }
}

/// Releases the claim on drop, including when the worker panics.
struct ClaimGuard<'a> {
    claims: &'a Claims,
    digest: Digest,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.claims
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.digest);
        self.claims.released.notify_all();
    }
}

/// File-scoped failure, unless the error means the volume itself is gone.
fn failure_outcome(job: &FileJob, path: PathBuf, error: Error) -> FileOutcome {
    if let Error::Io { source, .. } = &error {
        if is_device_removed_error(source) && std::fs::read_dir(&job.volume_root).is_err() {
            return FileOutcome::DriveGone(error.to_string());
        }
    }
    FileOutcome::Failed(FileFailure::from_error(path, &error))
}
