use super::{CopyEvent, NotificationChannel};
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Delivers notifications as log lines. Useful on headless machines where
/// nothing else is listening.
pub struct LogNotifier;

#[async_trait]
impl NotificationChannel for LogNotifier {
    async fn notify(&self, event: CopyEvent) -> Result<()> {
        info!(target: "fcad::notify", title = %event.title(), "{}", event.message());
        Ok(())
    }
}
