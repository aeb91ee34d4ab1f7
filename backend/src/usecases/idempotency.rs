use std::sync::Arc;

use chrono::Duration;
use storefront_core::{
    domain::{
        repositories::processed_webhook_events::ProcessedWebhookEventRepository,
        value_objects::{
            enums::event_processing_statuses::EventProcessingStatus,
            reconciliation::{OutcomeReason, ReconciliationOutcome},
        },
    },
    payments::stripe_events::WebhookEvent,
};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimDecision {
    /// Run the handler. `tracked` is false when the ledger could not be
    /// consulted, in which case nothing is recorded afterwards.
    Proceed { tracked: bool },
    /// An earlier delivery of this event completed.
    Duplicate,
    /// An earlier delivery claimed this event and has not finished. It may
    /// have crashed, so the provider must be told to retry rather than ack.
    InFlight,
}

/// Event-level dedup in front of the handlers. The handlers stay idempotent on
/// their own; the ledger only saves redundant provider calls and notifications.
/// Only a `completed` row is acknowledged as a duplicate.
pub struct IdempotencyGuard {
    ledger: Arc<dyn ProcessedWebhookEventRepository + Send + Sync>,
    stale_after: Duration,
}

impl IdempotencyGuard {
    pub fn new(
        ledger: Arc<dyn ProcessedWebhookEventRepository + Send + Sync>,
        stale_after: Duration,
    ) -> Self {
        Self {
            ledger,
            stale_after,
        }
    }

    pub async fn claim(&self, event: &WebhookEvent) -> ClaimDecision {
        let Some(event_id) = event.id.as_deref() else {
            return ClaimDecision::Proceed { tracked: false };
        };

        match self
            .ledger
            .try_claim(event_id, &event.event_type, self.stale_after)
            .await
        {
            Ok(true) => ClaimDecision::Proceed { tracked: true },
            Ok(false) => self.classify_unclaimable(event_id, &event.event_type).await,
            Err(err) => {
                warn!(
                    event_id,
                    error = ?err,
                    "idempotency: ledger unavailable, processing without dedup"
                );
                ClaimDecision::Proceed { tracked: false }
            }
        }
    }

    async fn classify_unclaimable(&self, event_id: &str, event_type: &str) -> ClaimDecision {
        match self.ledger.find(event_id).await {
            Ok(Some(row)) if row.processing_status() == Some(EventProcessingStatus::Completed) => {
                info!(event_id, event_type, "idempotency: duplicate delivery");
                ClaimDecision::Duplicate
            }
            Ok(_) => {
                warn!(
                    event_id,
                    event_type,
                    "idempotency: event is still being processed, asking provider to retry"
                );
                ClaimDecision::InFlight
            }
            Err(err) => {
                warn!(
                    event_id,
                    error = ?err,
                    "idempotency: could not read ledger row, asking provider to retry"
                );
                ClaimDecision::InFlight
            }
        }
    }

    /// Failed outcomes leave the row reclaimable so a provider retry runs again.
    pub async fn record(&self, event_id: &str, outcome: &ReconciliationOutcome) {
        let (status, error) = match &outcome.reason {
            OutcomeReason::Failed(err) => (EventProcessingStatus::Failed, Some(err.clone())),
            _ => (EventProcessingStatus::Completed, None),
        };

        if let Err(err) = self
            .ledger
            .complete(event_id, status, outcome.summary(), error)
            .await
        {
            warn!(event_id, error = ?err, "idempotency: failed to record event outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::test_support::InMemoryStore;
    use anyhow::anyhow;
    use storefront_core::{
        domain::{
            repositories::processed_webhook_events::MockProcessedWebhookEventRepository,
            value_objects::reconciliation::SkipReason,
        },
        payments::stripe_events::{INVOICE_PAID, WebhookEventKind},
    };

    fn event(id: Option<&str>) -> WebhookEvent {
        WebhookEvent {
            id: id.map(str::to_string),
            event_type: INVOICE_PAID.to_string(),
            created: None,
            livemode: false,
            kind: WebhookEventKind::Unhandled,
        }
    }

    #[tokio::test]
    async fn second_claim_of_completed_event_is_duplicate() {
        let store = InMemoryStore::new();
        let guard = IdempotencyGuard::new(store.clone(), Duration::minutes(5));
        let event = event(Some("evt_1"));

        assert_eq!(guard.claim(&event).await, ClaimDecision::Proceed { tracked: true });
        guard
            .record("evt_1", &ReconciliationOutcome::skipped(SkipReason::NoOp))
            .await;
        assert_eq!(guard.claim(&event).await, ClaimDecision::Duplicate);

        let row = store.find("evt_1").await.unwrap().unwrap();
        assert_eq!(row.processing_status(), Some(EventProcessingStatus::Completed));
        assert_eq!(row.outcome.as_deref(), Some("skipped: no-op"));
    }

    #[tokio::test]
    async fn unfinished_event_is_in_flight_until_stale() {
        let store = InMemoryStore::new();
        let event = event(Some("evt_1"));

        let fresh = IdempotencyGuard::new(store.clone(), Duration::minutes(5));
        assert_eq!(fresh.claim(&event).await, ClaimDecision::Proceed { tracked: true });
        assert_eq!(fresh.claim(&event).await, ClaimDecision::InFlight);

        let impatient = IdempotencyGuard::new(store.clone(), Duration::seconds(-1));
        assert_eq!(
            impatient.claim(&event).await,
            ClaimDecision::Proceed { tracked: true }
        );
    }

    #[tokio::test]
    async fn failed_event_can_be_claimed_again() {
        let store = InMemoryStore::new();
        let guard = IdempotencyGuard::new(store.clone(), Duration::minutes(5));
        let event = event(Some("evt_1"));

        guard.claim(&event).await;
        guard
            .record("evt_1", &ReconciliationOutcome::failed("db down"))
            .await;

        let row = store.find("evt_1").await.unwrap().unwrap();
        assert_eq!(row.processing_status(), Some(EventProcessingStatus::Failed));
        assert_eq!(row.error.as_deref(), Some("db down"));
        assert_eq!(guard.claim(&event).await, ClaimDecision::Proceed { tracked: true });
    }

    #[tokio::test]
    async fn unreadable_ledger_row_is_never_acknowledged_as_duplicate() {
        let mut ledger = MockProcessedWebhookEventRepository::new();
        ledger.expect_try_claim().returning(|_, _, _| Ok(false));
        ledger
            .expect_find()
            .returning(|_| Err(anyhow!("connection reset")));
        let guard = IdempotencyGuard::new(Arc::new(ledger), Duration::minutes(5));

        assert_eq!(
            guard.claim(&event(Some("evt_1"))).await,
            ClaimDecision::InFlight
        );
    }

    #[tokio::test]
    async fn events_without_id_bypass_the_ledger() {
        let mut ledger = MockProcessedWebhookEventRepository::new();
        ledger.expect_try_claim().never();
        let guard = IdempotencyGuard::new(Arc::new(ledger), Duration::minutes(5));

        assert_eq!(
            guard.claim(&event(None)).await,
            ClaimDecision::Proceed { tracked: false }
        );
    }

    #[tokio::test]
    async fn unavailable_ledger_does_not_block_processing() {
        let mut ledger = MockProcessedWebhookEventRepository::new();
        ledger
            .expect_try_claim()
            .returning(|_, _, _| Err(anyhow!("connection refused")));
        let guard = IdempotencyGuard::new(Arc::new(ledger), Duration::minutes(5));

        assert_eq!(
            guard.claim(&event(Some("evt_1"))).await,
            ClaimDecision::Proceed { tracked: false }
        );
    }
}
