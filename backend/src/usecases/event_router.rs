use chrono::{DateTime, Utc};
use storefront_core::{
    domain::value_objects::reconciliation::ReconciliationOutcome,
    payments::stripe_events::{WebhookEvent, WebhookEventKind},
};
use tracing::debug;

use super::{
    checkout_completed::CheckoutCompletedHandler, subscription_events::SubscriptionEventsHandler,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Handled(ReconciliationOutcome),
    Ignored,
}

pub struct EventRouter {
    checkout: CheckoutCompletedHandler,
    subscriptions: SubscriptionEventsHandler,
}

impl EventRouter {
    pub fn new(checkout: CheckoutCompletedHandler, subscriptions: SubscriptionEventsHandler) -> Self {
        Self {
            checkout,
            subscriptions,
        }
    }

    pub async fn route(&self, event: &WebhookEvent, now: DateTime<Utc>) -> Routed {
        let outcome = match &event.kind {
            WebhookEventKind::CheckoutCompleted(checkout) => self.checkout.handle(checkout, now).await,
            WebhookEventKind::InvoicePaid(invoice) => {
                self.subscriptions.handle_invoice_paid(invoice).await
            }
            WebhookEventKind::SubscriptionUpdated(change) => {
                self.subscriptions.handle_updated(change, now).await
            }
            WebhookEventKind::SubscriptionDeleted(change) => {
                self.subscriptions.handle_canceled(change, now).await
            }
            WebhookEventKind::Unhandled => {
                debug!(event_type = %event.event_type, "router: no handler for event type");
                return Routed::Ignored;
            }
        };

        Routed::Handled(outcome)
    }
}
