use std::sync::Arc;

use chrono::{DateTime, Utc};
use storefront_core::{
    domain::{
        entities::subscriptions::SubscriptionSnapshotChangeset,
        repositories::subscriptions::SubscriptionRepository,
        value_objects::{
            enums::subscription_statuses::SubscriptionStatus,
            reconciliation::{ReconciliationOutcome, SkipReason},
        },
    },
    payments::stripe_events::{InvoicePaid, SubscriptionChange},
};
use tracing::{error, info, warn};

pub struct SubscriptionEventsHandler {
    subscriptions: Arc<dyn SubscriptionRepository + Send + Sync>,
}

impl SubscriptionEventsHandler {
    pub fn new(subscriptions: Arc<dyn SubscriptionRepository + Send + Sync>) -> Self {
        Self { subscriptions }
    }

    /// Overwrites the stored row with the provider's latest snapshot.
    pub async fn handle_updated(
        &self,
        change: &SubscriptionChange,
        now: DateTime<Utc>,
    ) -> ReconciliationOutcome {
        let stripe_subscription_id = change.subscription_id.as_str();
        let status = change.status.as_deref().and_then(|raw| {
            let parsed = raw.parse::<SubscriptionStatus>();
            if parsed.is_err() {
                warn!(
                    stripe_subscription_id,
                    status = raw,
                    "subscriptions: unknown provider status, keeping stored status"
                );
            }
            parsed.ok()
        });

        let changeset = SubscriptionSnapshotChangeset {
            status: status.map(|status| status.to_string()),
            current_period_start: change.current_period_start,
            current_period_end: change.current_period_end,
            cancel_at_period_end: Some(change.cancel_at_period_end),
            canceled_at: Some(change.canceled_at),
            updated_at: Some(now),
        };

        match self
            .subscriptions
            .apply_provider_snapshot(stripe_subscription_id, changeset)
            .await
        {
            Ok(effect) if effect.is_applied() => {
                info!(
                    stripe_subscription_id,
                    status = ?status,
                    cancel_at_period_end = change.cancel_at_period_end,
                    "subscriptions: provider snapshot applied"
                );
                ReconciliationOutcome::applied(Vec::new(), Vec::new())
            }
            Ok(_) => {
                info!(stripe_subscription_id, "subscriptions: update for untracked subscription ignored");
                ReconciliationOutcome::skipped(SkipReason::UntrackedSubscription(
                    stripe_subscription_id.to_string(),
                ))
            }
            Err(err) => {
                error!(stripe_subscription_id, error = ?err, "subscriptions: failed to apply provider snapshot");
                ReconciliationOutcome::failed(format!("{err:#}"))
            }
        }
    }

    pub async fn handle_canceled(
        &self,
        change: &SubscriptionChange,
        now: DateTime<Utc>,
    ) -> ReconciliationOutcome {
        let stripe_subscription_id = change.subscription_id.as_str();

        match self
            .subscriptions
            .find_by_stripe_subscription_id(stripe_subscription_id)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(stripe_subscription_id, "subscriptions: cancellation for untracked subscription ignored");
                return ReconciliationOutcome::skipped(SkipReason::UntrackedSubscription(
                    stripe_subscription_id.to_string(),
                ));
            }
            Err(err) => {
                error!(stripe_subscription_id, error = ?err, "subscriptions: failed to load subscription");
                return ReconciliationOutcome::failed(format!("{err:#}"));
            }
        }

        let canceled_at = change.canceled_at.unwrap_or(now);
        match self
            .subscriptions
            .mark_canceled(stripe_subscription_id, canceled_at)
            .await
        {
            Ok(effect) if effect.is_applied() => {
                info!(stripe_subscription_id, %canceled_at, "subscriptions: subscription canceled");
                ReconciliationOutcome::applied(Vec::new(), Vec::new())
            }
            Ok(_) => {
                info!(stripe_subscription_id, "subscriptions: subscription was already canceled");
                ReconciliationOutcome::skipped(SkipReason::AlreadyApplied)
            }
            Err(err) => {
                error!(stripe_subscription_id, error = ?err, "subscriptions: failed to cancel subscription");
                ReconciliationOutcome::failed(format!("{err:#}"))
            }
        }
    }

    /// Renewal bookkeeping is not tracked yet; the event is only logged.
    pub async fn handle_invoice_paid(&self, invoice: &InvoicePaid) -> ReconciliationOutcome {
        info!(
            invoice_id = %invoice.invoice_id,
            stripe_subscription_id = ?invoice.subscription_id,
            amount_paid = ?invoice.amount_paid_minor,
            billing_reason = ?invoice.billing_reason,
            "subscriptions: invoice paid"
        );
        ReconciliationOutcome::skipped(SkipReason::NoOp)
    }
}
