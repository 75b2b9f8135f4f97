pub mod telegram;
pub mod webhook;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use crate::{
    config::NotificationsConfig,
    error::Result,
    storage::{BatchJob, SuppressionEntry},
};

pub use telegram::TelegramNotifier;
pub use webhook::WebhookNotifier;

/// Something downstream systems want to hear about
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum NotifyEvent {
    BatchCompleted(BatchJob),
    DncAdded(SuppressionEntry),
}

impl NotifyEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NotifyEvent::BatchCompleted(_) => "batch_completed",
            NotifyEvent::DncAdded(_) => "dnc_added",
        }
    }
}

/// A delivery channel for events. Retries and delivery guarantees are the
/// channel's own business; callers never wait on it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, event: &NotifyEvent) -> Result<()>;
}

/// Fan-out over every configured channel. Clones share the set of
/// deliveries still in flight, so any clone can drain them.
#[derive(Clone, Default)]
pub struct Notifiers {
    channels: Vec<Arc<dyn Notifier>>,
    in_flight: Arc<Mutex<JoinSet<()>>>,
}

impl Notifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &NotificationsConfig) -> Result<Self> {
        let mut notifiers = Self::new();
        if let Some(url) = &config.webhook_url {
            notifiers.add(Arc::new(WebhookNotifier::new(url)?));
        }
        if let Some(telegram) = &config.telegram {
            if let Some(notifier) = TelegramNotifier::new(telegram) {
                notifiers.add(Arc::new(notifier));
            }
        }
        Ok(notifiers)
    }

    pub fn add(&mut self, notifier: Arc<dyn Notifier>) {
        self.channels.push(notifier);
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn in_flight(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fire-and-forget: each channel gets its own task
    pub fn dispatch(&self, event: NotifyEvent) {
        if self.channels.is_empty() {
            return;
        }

        let event = Arc::new(event);
        let mut in_flight = self.in_flight();
        // Reap deliveries that already finished
        while let Some(Some(_)) = in_flight.join_next().now_or_never() {}

        for channel in &self.channels {
            let channel = channel.clone();
            let event = event.clone();
            in_flight.spawn(async move {
                match channel.notify(&event).await {
                    Ok(()) => debug!("{} notification sent via {}", event.name(), channel.name()),
                    Err(e) => error!("{} notification via {} failed: {}", event.name(), channel.name(), e),
                }
            });
        }
    }

    /// Wait up to `limit` for deliveries still in flight. Anything slower
    /// is abandoned with a warning.
    pub async fn drain(&self, limit: Duration) {
        let mut pending = std::mem::take(&mut *self.in_flight());
        if pending.is_empty() {
            return;
        }

        debug!("Waiting for {} notification deliveries", pending.len());
        let finished = tokio::time::timeout(limit, async {
            while pending.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !finished {
            warn!("{} notification deliveries still pending after {:?}, dropping them", pending.len(), limit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComplianceError;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_dispatch_reaches_every_channel_even_if_one_fails() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut failing = MockNotifier::new();
        failing.expect_name().return_const("broken");
        failing
            .expect_notify()
            .returning(|_| Err(ComplianceError::Storage("down".into())));

        let mut working = MockNotifier::new();
        working.expect_name().return_const("working");
        working.expect_notify().returning(move |event| {
            tx.send(event.name()).unwrap();
            Ok(())
        });

        let mut notifiers = Notifiers::new();
        notifiers.add(Arc::new(failing));
        notifiers.add(Arc::new(working));
        notifiers.dispatch(NotifyEvent::BatchCompleted(BatchJob::new(None, 1)));

        assert_eq!(rx.recv().await, Some("batch_completed"));
    }

    /// Channel that takes a while to deliver
    struct SlowNotifier {
        delay: Duration,
        delivered: mpsc::UnboundedSender<&'static str>,
    }

    #[async_trait]
    impl Notifier for SlowNotifier {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn notify(&self, event: &NotifyEvent) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            let _ = self.delivered.send(event.name());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_drain_waits_for_pending_deliveries() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut notifiers = Notifiers::new();
        notifiers.add(Arc::new(SlowNotifier {
            delay: Duration::from_millis(100),
            delivered: tx,
        }));

        // Dispatch through a clone, drain through the original
        notifiers.clone().dispatch(NotifyEvent::BatchCompleted(BatchJob::new(None, 1)));
        assert!(rx.try_recv().is_err());

        notifiers.drain(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().ok(), Some("batch_completed"));
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_limit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut notifiers = Notifiers::new();
        notifiers.add(Arc::new(SlowNotifier {
            delay: Duration::from_secs(30),
            delivered: tx,
        }));

        notifiers.dispatch(NotifyEvent::BatchCompleted(BatchJob::new(None, 1)));
        let started = std::time::Instant::now();
        notifiers.drain(Duration::from_millis(50)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_empty_config_builds_no_channels() {
        let notifiers = Notifiers::from_config(&NotificationsConfig::default()).unwrap();
        assert!(notifiers.is_empty());
    }
}
