use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{Level, warn};

/// Target used for the queue's own diagnostics; the alert layer never forwards it.
pub(crate) const ALERT_INTERNAL_TARGET: &str = "storefront_core::observability::alerts";

const QUEUE_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub(crate) struct AlertEvent {
    pub(crate) level: Level,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) service_name: String,
    pub(crate) environment: String,
    pub(crate) component: String,
    pub(crate) target: String,
    pub(crate) location: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) fields: BTreeMap<String, String>,
    pub(crate) span_fields: BTreeMap<String, String>,
}

#[async_trait]
pub(crate) trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &AlertEvent) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Bounded hand-off between the tracing layer (sync) and the alert sinks (async).
#[derive(Clone)]
pub(crate) struct AlertQueue {
    tx: mpsc::Sender<AlertEvent>,
    dropped: Arc<AtomicU64>,
}

impl AlertQueue {
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AlertEvent>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                for sink in &sinks {
                    if let Err(err) = sink.deliver(&alert).await {
                        warn!(
                            target: ALERT_INTERNAL_TARGET,
                            sink = sink.name(),
                            error = %err,
                            "alerts: delivery failed"
                        );
                    }
                }
            }
        });

        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn push(&self, alert: AlertEvent) {
        if self.tx.try_send(alert).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % 100 == 0 {
                warn!(
                    target: ALERT_INTERNAL_TARGET,
                    dropped,
                    "alerts: queue full or closed, dropping alert"
                );
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn deliver(&self, alert: &AlertEvent) -> Result<()> {
            self.seen
                .lock()
                .await
                .push(alert.message.clone().unwrap_or_default());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn alert(message: &str) -> AlertEvent {
        AlertEvent {
            level: Level::ERROR,
            timestamp: Utc::now(),
            service_name: "storefront".to_string(),
            environment: "local".to_string(),
            component: "backend".to_string(),
            target: "checkout".to_string(),
            location: None,
            message: Some(message.to_string()),
            fields: BTreeMap::new(),
            span_fields: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn delivers_pushed_alerts_to_every_sink() {
        let sink = Arc::new(RecordingSink::default());
        let queue = AlertQueue::spawn(vec![sink.clone() as Arc<dyn AlertSink>]);

        queue.push(alert("order insert failed"));

        for _ in 0..50 {
            if !sink.seen.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*sink.seen.lock().await, vec!["order insert failed".to_string()]);
        assert_eq!(queue.dropped(), 0);
    }
}
