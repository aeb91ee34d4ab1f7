use std::sync::Arc;

use chrono::Utc;
use storefront_core::{
    domain::{
        entities::reconciliation_failures::InsertReconciliationFailureEntity,
        repositories::reconciliation_failures::ReconciliationFailureRepository,
        value_objects::reconciliation::{OutcomeReason, ReconciliationOutcome},
    },
    payments::{
        stripe_events::WebhookEvent,
        webhook_signature::{VerificationError, WebhookVerifier},
    },
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{
    event_router::{EventRouter, Routed},
    idempotency::{ClaimDecision, IdempotencyGuard},
    side_effects::{DispatchReport, SideEffectDispatcher},
};

const UNIDENTIFIED_EVENT: &str = "unidentified";

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookAck {
    Ignored,
    Duplicate,
    Processed {
        outcome: ReconciliationOutcome,
        report: DispatchReport,
    },
}

/// The only outcomes that reach the provider as a non-2xx response.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing stripe-signature header")]
    MissingSignature,
    #[error(transparent)]
    Verification(#[from] VerificationError),
    /// Another delivery of the same event has not finished yet.
    #[error("event {0} is still being processed, retry later")]
    InFlight(String),
}

pub struct StripeWebhookUseCase {
    verifier: WebhookVerifier,
    guard: IdempotencyGuard,
    router: EventRouter,
    dispatcher: SideEffectDispatcher,
    failures: Arc<dyn ReconciliationFailureRepository + Send + Sync>,
}

impl StripeWebhookUseCase {
    pub fn new(
        verifier: WebhookVerifier,
        guard: IdempotencyGuard,
        router: EventRouter,
        dispatcher: SideEffectDispatcher,
        failures: Arc<dyn ReconciliationFailureRepository + Send + Sync>,
    ) -> Self {
        Self {
            verifier,
            guard,
            router,
            dispatcher,
            failures,
        }
    }

    /// Verifies, deduplicates and reconciles one delivery. Once the event is
    /// authenticated the result is always `Ok`, whatever happened inside.
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, WebhookError> {
        let signature = signature
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                warn!("stripe_webhook: delivery without signature header rejected");
                WebhookError::MissingSignature
            })?;

        let event = self.verifier.verify(payload, signature).map_err(|err| {
            warn!(error = %err, "stripe_webhook: delivery rejected");
            WebhookError::from(err)
        })?;
        let event_id = event.id.as_deref().unwrap_or(UNIDENTIFIED_EVENT);
        info!(
            event_id,
            event_type = %event.event_type,
            livemode = event.livemode,
            "stripe_webhook: event verified"
        );

        if !event.is_handled() {
            debug!(event_id, event_type = %event.event_type, "stripe_webhook: event type ignored");
            return Ok(WebhookAck::Ignored);
        }

        let tracked = match self.guard.claim(&event).await {
            ClaimDecision::Duplicate => return Ok(WebhookAck::Duplicate),
            ClaimDecision::InFlight => return Err(WebhookError::InFlight(event_id.to_string())),
            ClaimDecision::Proceed { tracked } => tracked,
        };

        let outcome = match self.router.route(&event, Utc::now()).await {
            Routed::Handled(outcome) => outcome,
            Routed::Ignored => return Ok(WebhookAck::Ignored),
        };

        self.record_failures(&event, &outcome).await;
        if let (true, Some(id)) = (tracked, event.id.as_deref()) {
            self.guard.record(id, &outcome).await;
        }

        let report = self.dispatcher.dispatch(outcome.side_effects.clone()).await;
        info!(
            event_id,
            event_type = %event.event_type,
            outcome = %outcome.summary(),
            notifications_delivered = report.delivered,
            notifications_failed = report.failed.len(),
            "stripe_webhook: event reconciled"
        );

        Ok(WebhookAck::Processed { outcome, report })
    }

    async fn record_failures(&self, event: &WebhookEvent, outcome: &ReconciliationOutcome) {
        let event_id = event.id.as_deref().unwrap_or(UNIDENTIFIED_EVENT);
        let row = |step: &str, entity_ref: Option<String>, error: String| {
            InsertReconciliationFailureEntity {
                event_id: event_id.to_string(),
                event_type: event.event_type.clone(),
                step: step.to_string(),
                entity_ref,
                error,
            }
        };

        let mut rows: Vec<_> = outcome
            .isolated_failures
            .iter()
            .map(|failure| {
                row(
                    failure.step.as_str(),
                    failure.entity_ref.clone(),
                    failure.error.clone(),
                )
            })
            .collect();
        match &outcome.reason {
            OutcomeReason::Skipped(reason) if reason.is_missing_entity() => {
                let entity_ref = reason.missing_entity().map(ToString::to_string);
                rows.push(row("resolve_entity", entity_ref, reason.to_string()));
            }
            OutcomeReason::Failed(err) => rows.push(row("handler", None, err.clone())),
            _ => {}
        }

        for failure in rows {
            let step = failure.step.clone();
            match self.failures.record(failure).await {
                Ok(failure_id) => error!(
                    event_id,
                    event_type = %event.event_type,
                    step = %step,
                    %failure_id,
                    "stripe_webhook: reconciliation failure recorded for follow-up"
                ),
                Err(err) => error!(
                    event_id,
                    step = %step,
                    error = ?err,
                    "stripe_webhook: could not record reconciliation failure"
                ),
            }
        }
    }
}
