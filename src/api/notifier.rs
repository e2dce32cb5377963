use async_trait::async_trait;
use std::sync::Arc;

/// Operator notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> anyhow::Result<()>;
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        tracing::info!("🔔 {}", message);
        Ok(())
    }
}

/// Fire-and-forget delivery; failures are logged and never reach the caller
pub fn notify_detached(notifier: &Arc<dyn Notifier>, message: impl Into<String>) {
    let notifier = Arc::clone(notifier);
    let message = message.into();
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&message).await {
            tracing::warn!("Notification failed: {}", e);
        }
    });
}
