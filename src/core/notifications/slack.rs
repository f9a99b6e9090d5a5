use super::{CopyEvent, NotificationChannel};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    fn format_message(&self, event: &CopyEvent) -> serde_json::Value {
        let (volume_label, run_id) = match event {
            CopyEvent::TierFinished {
                volume_label,
                run_id,
                ..
            }
            | CopyEvent::RunFailed {
                volume_label,
                run_id,
                ..
            } => (volume_label.as_str(), run_id.as_str()),
            CopyEvent::RunFinished { summary } => {
                (summary.volume_label.as_str(), summary.run_id.as_str())
            }
        };
        let short_id = &run_id[..8.min(run_id.len())];

        let mut fields = vec![
            json!({
                "type": "mrkdwn",
                "text": format!("*Drive:*\n{}", volume_label)
            }),
            json!({
                "type": "mrkdwn",
                "text": format!("*Run ID:*\n`{}`", short_id)
            }),
        ];

        if let CopyEvent::RunFinished { summary } = event {
            fields.push(json!({
                "type": "mrkdwn",
                "text": format!("*Destination:*\n`{}`", summary.destination.display())
            }));
            fields.push(json!({
                "type": "mrkdwn",
                "text": format!("*Duration:*\n{}s", summary.duration_secs())
            }));
        }

        let body = match event {
            CopyEvent::RunFailed { error, .. } => format!("*Error:*\n```{}```", error),
            _ => event.message(),
        };

        json!({
            "blocks": [
                {
                    "type": "header",
                    "text": {
                        "type": "plain_text",
                        "text": event.title(),
                        "emoji": true
                    }
                },
                {
                    "type": "section",
                    "fields": fields
                },
                {
                    "type": "section",
                    "text": {
                        "type": "mrkdwn",
                        "text": body
                    }
                }
            ]
        })
    }
}

#[async_trait]
impl NotificationChannel for SlackNotifier {
    async fn notify(&self, event: CopyEvent) -> Result<()> {
        let payload = self.format_message(&event);
        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
