//! Turns periodic drive enumeration into a stream of attach events.
//!
//! A volume must stay visible for the whole stability window before it is
//! reported, so a card that is still mounting (or flickering) produces one
//! event, not several. A reported volume is not reported again until it has
//! been seen detached.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::DriveEnumerator;
use crate::config::MonitorConfig;
use crate::core::models::{DriveEvent, Volume};

pub struct DriveMonitor {
    enumerator: Arc<dyn DriveEnumerator>,
    poll_interval: Duration,
    stability_window: Duration,
    cancel: CancellationToken,
}

impl DriveMonitor {
    pub fn new(
        enumerator: Arc<dyn DriveEnumerator>,
        poll_interval: Duration,
        stability_window: Duration,
    ) -> Self {
        Self {
            enumerator,
            poll_interval,
            stability_window,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(enumerator: Arc<dyn DriveEnumerator>, config: &MonitorConfig) -> Self {
        Self::new(enumerator, config.poll_interval(), config.stability_window())
    }

    /// Stop the event sequence when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Start watching. Consumes the monitor; nothing is polled until the
    /// first call to [`DriveEvents::next`].
    pub fn watch(self) -> DriveEvents {
        DriveEvents {
            enumerator: self.enumerator,
            poll_interval: self.poll_interval,
            stability_window: self.stability_window,
            cancel: self.cancel,
            reported: HashSet::new(),
            pending: HashMap::new(),
            ready: VecDeque::new(),
        }
    }
}

struct Pending {
    volume: Volume,
    first_seen: Instant,
    last_seen: Instant,
}

/// Lazy, infinite sequence of [`DriveEvent`]s. Ends only on cancellation.
pub struct DriveEvents {
    enumerator: Arc<dyn DriveEnumerator>,
    poll_interval: Duration,
    stability_window: Duration,
    cancel: CancellationToken,
    /// Volumes already reported and still attached.
    reported: HashSet<PathBuf>,
    /// Volumes seen but not yet stable.
    pending: HashMap<PathBuf, Pending>,
    ready: VecDeque<DriveEvent>,
}

impl DriveEvents {
    /// Wait for the next newly attached volume.
    ///
    /// Between calls nothing is polled, so a caller that awaits each run
    /// before asking again never sees an event while a run is in progress.
    pub async fn next(&mut self) -> Option<DriveEvent> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }

            match self.enumerator.removable_volumes() {
                Ok(volumes) => self.observe(volumes, Instant::now()),
                Err(e) => warn!(error = %e, "Drive enumeration failed"),
            }

            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = sleep(self.poll_interval) => {}
            }
        }
    }

    /// Longest gap between sightings that still counts as continuous.
    fn stale_after(&self) -> Duration {
        self.poll_interval * 2
    }

    /// Fold one enumeration snapshot into the debounce state.
    fn observe(&mut self, volumes: Vec<Volume>, now: Instant) {
        let present: HashSet<PathBuf> = volumes.iter().map(|v| v.root.clone()).collect();

        self.reported.retain(|root| {
            let still_there = present.contains(root);
            if !still_there {
                info!(root = %root.display(), "Drive detached");
            }
            still_there
        });
        self.pending.retain(|root, _| present.contains(root));
        let stale_after = self.stale_after();

        for volume in volumes {
            if self.reported.contains(&volume.root) {
                continue;
            }

            let root = volume.root.clone();
            let entry = self.pending.entry(root.clone()).or_insert_with(|| {
                debug!(root = %root.display(), "Drive seen, waiting for it to settle");
                Pending {
                    volume,
                    first_seen: now,
                    last_seen: now,
                }
            });

            // Nothing is polled while a run is in progress, so a long gap
            // says nothing about whether the volume stayed mounted.
            if now.duration_since(entry.last_seen) > stale_after {
                debug!(root = %root.display(), "Drive not watched for a while, restarting its window");
                entry.first_seen = now;
            }
            entry.last_seen = now;

            if now.duration_since(entry.first_seen) >= self.stability_window {
                if let Some(Pending { volume, .. }) = self.pending.remove(&root) {
                    info!(root = %root.display(), label = %volume.label, "Drive attached");
                    self.reported.insert(root);
                    self.ready.push_back(DriveEvent {
                        volume,
                        detected_at: Utc::now(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedEnumerator;

    fn events(window_ms: u64) -> DriveEvents {
        let (enumerator, _controller) = SimulatedEnumerator::new();
        DriveMonitor::new(
            Arc::new(enumerator),
            Duration::from_millis(500),
            Duration::from_millis(window_ms),
        )
        .watch()
    }

    fn card() -> Vec<Volume> {
        vec![Volume::new("/media/CARD")]
    }

    #[test]
    fn volume_is_reported_only_after_stability_window() {
        let mut events = events(1000);
        let t0 = Instant::now();

        events.observe(card(), t0);
        assert!(events.ready.is_empty());

        events.observe(card(), t0 + Duration::from_millis(999));
        assert!(events.ready.is_empty());

        events.observe(card(), t0 + Duration::from_millis(1000));
        assert_eq!(events.ready.len(), 1);
    }

    #[test]
    fn flicker_restarts_the_window() {
        let mut events = events(1000);
        let t0 = Instant::now();

        events.observe(card(), t0);
        events.observe(Vec::new(), t0 + Duration::from_millis(300));
        events.observe(card(), t0 + Duration::from_millis(600));
        events.observe(card(), t0 + Duration::from_millis(1200));
        assert!(events.ready.is_empty());

        events.observe(card(), t0 + Duration::from_millis(1600));
        assert_eq!(events.ready.len(), 1);
    }

    #[test]
    fn attached_volume_does_not_retrigger_until_detached() {
        let mut events = events(0);
        let t0 = Instant::now();

        events.observe(card(), t0);
        events.observe(card(), t0 + Duration::from_millis(100));
        assert_eq!(events.ready.len(), 1);

        events.observe(Vec::new(), t0 + Duration::from_millis(200));
        events.observe(card(), t0 + Duration::from_millis(300));
        assert_eq!(events.ready.len(), 2);
    }

    #[test]
    fn unwatched_gap_restarts_the_window() {
        let mut events = events(1000);
        let t0 = Instant::now();

        events.observe(card(), t0);
        // A copy run kept the monitor from polling for a minute.
        let resumed = t0 + Duration::from_secs(60);
        events.observe(card(), resumed);
        assert!(events.ready.is_empty());

        events.observe(card(), resumed + Duration::from_millis(500));
        assert!(events.ready.is_empty());

        events.observe(card(), resumed + Duration::from_millis(1000));
        assert_eq!(events.ready.len(), 1);
    }
}
