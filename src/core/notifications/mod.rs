mod log;
mod slack;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{NotificationChannelType, NotificationConfig};
use crate::core::models::{PriorityTier, RunSummary, TierSummary};

pub use log::LogNotifier;
pub use slack::SlackNotifier;

/// Events that trigger notifications
#[derive(Debug, Clone)]
pub enum CopyEvent {
    TierFinished {
        run_id: String,
        volume_label: String,
        tier: TierSummary,
    },
    RunFinished {
        summary: RunSummary,
    },
    RunFailed {
        run_id: String,
        volume_label: String,
        error: String,
    },
}

impl CopyEvent {
    pub fn title(&self) -> String {
        match self {
            CopyEvent::TierFinished { tier, .. } => format!("Finished {}", tier.label),
            CopyEvent::RunFinished { summary } => {
                format!("Finished copying files from {}", summary.volume_label)
            }
            CopyEvent::RunFailed { volume_label, .. } => {
                format!("Copying from {} stopped", volume_label)
            }
        }
    }

    pub fn message(&self) -> String {
        match self {
            CopyEvent::TierFinished { tier, .. } => {
                if tier.files_copied == 0 {
                    format!(
                        "No new {} files were found ({} already copied).",
                        tier.label, tier.duplicates_skipped
                    )
                } else {
                    copied_message(tier.files_copied, tier.bytes_copied, tier.duplicates_skipped)
                }
            }
            CopyEvent::RunFinished { summary } => {
                let mut msg = if summary.files_copied == 0 {
                    format!(
                        "No files were copied ({} already copied).",
                        summary.duplicates_skipped
                    )
                } else {
                    copied_message(
                        summary.files_copied,
                        summary.bytes_copied,
                        summary.duplicates_skipped,
                    )
                };
                if !summary.failures.is_empty() {
                    msg.push_str(&format!(" {} file(s) failed.", summary.failures.len()));
                }
                msg
            }
            CopyEvent::RunFailed { error, .. } => error.clone(),
        }
    }
}

fn copied_message(files: u64, bytes: u64, duplicates: u64) -> String {
    format!(
        "Copied {} files of total size of {:.2} GB, skipped {} already copied.",
        files,
        bytes as f64 / 1e9,
        duplicates
    )
}

/// Trait for notification channel implementations (Slack, log, etc.)
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, event: CopyEvent) -> Result<()>;
}

/// Factory function to create a notifier based on config
pub fn create_notifier(config: &NotificationConfig) -> Option<Arc<dyn NotificationChannel>> {
    match &config.channel {
        NotificationChannelType::None => None,
        NotificationChannelType::Log => Some(Arc::new(LogNotifier)),
        NotificationChannelType::Slack => {
            let webhook = config.slack_webhook.as_ref()?;
            if webhook.is_empty() {
                return None;
            }
            Some(Arc::new(SlackNotifier::new(webhook.clone())))
        }
    }
}

/// Decides which tier boundaries produce a notification.
///
/// "After every priority" covers every priority tier. Otherwise the first and
/// last toggles pick out the first and last configured priority tiers. The
/// catch-all tier is reported through the run summary only.
#[derive(Debug, Clone, Copy)]
pub struct NotificationPolicy {
    pub after_all_transfers: bool,
    pub after_every_priority: bool,
    pub after_first_priority: bool,
    pub after_last_priority: bool,
}

impl From<&NotificationConfig> for NotificationPolicy {
    fn from(config: &NotificationConfig) -> Self {
        Self {
            after_all_transfers: config.after_all_transfers,
            after_every_priority: config.after_every_priority,
            after_first_priority: config.after_first_priority,
            after_last_priority: config.after_last_priority,
        }
    }
}

impl NotificationPolicy {
    pub fn notify_tier(&self, tier: &PriorityTier, tiers: &[PriorityTier]) -> bool {
        if !tier.is_priority() {
            return false;
        }
        if self.after_every_priority {
            return true;
        }

        let first = tiers.iter().find(|t| t.is_priority()).map(|t| t.rank);
        let last = tiers.iter().rev().find(|t| t.is_priority()).map(|t| t.rank);

        (self.after_first_priority && first == Some(tier.rank))
            || (self.after_last_priority && last == Some(tier.rank))
    }

    pub fn notify_run(&self) -> bool {
        self.after_all_transfers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::TierKind;

    fn tiers() -> Vec<PriorityTier> {
        let mk = |rank, kind| PriorityTier {
            rank,
            kind,
            files: Vec::new(),
        };
        vec![
            mk(0, TierKind::Priority("jpg".into())),
            mk(1, TierKind::Priority("cr2".into())),
            mk(2, TierKind::Priority("mp4".into())),
            mk(3, TierKind::NonPriority),
        ]
    }

    fn policy(every: bool, first: bool, last: bool) -> NotificationPolicy {
        NotificationPolicy {
            after_all_transfers: true,
            after_every_priority: every,
            after_first_priority: first,
            after_last_priority: last,
        }
    }

    fn notified(policy: NotificationPolicy) -> Vec<usize> {
        let tiers = tiers();
        tiers
            .iter()
            .filter(|t| policy.notify_tier(t, &tiers))
            .map(|t| t.rank)
            .collect()
    }

    #[test]
    fn every_priority_covers_all_priority_tiers_only() {
        assert_eq!(notified(policy(true, false, false)), vec![0, 1, 2]);
    }

    #[test]
    fn first_and_last_toggles_pick_boundaries() {
        assert_eq!(notified(policy(false, true, false)), vec![0]);
        assert_eq!(notified(policy(false, false, true)), vec![2]);
        assert_eq!(notified(policy(false, true, true)), vec![0, 2]);
        assert!(notified(policy(false, false, false)).is_empty());
    }

    #[test]
    fn empty_tier_message_says_nothing_was_found() {
        let event = CopyEvent::TierFinished {
            run_id: "r".into(),
            volume_label: "CARD".into(),
            tier: TierSummary {
                rank: 0,
                label: "Priority 1 (JPG)".into(),
                ..TierSummary::default()
            },
        };
        assert_eq!(event.title(), "Finished Priority 1 (JPG)");
        assert!(event.message().starts_with("No new Priority 1 (JPG) files"));
    }

    #[test]
    fn none_channel_creates_no_notifier() {
        let config = NotificationConfig {
            channel: NotificationChannelType::None,
            ..NotificationConfig::default()
        };
        assert!(create_notifier(&config).is_none());
        assert!(create_notifier(&NotificationConfig::default()).is_some());
    }
}
