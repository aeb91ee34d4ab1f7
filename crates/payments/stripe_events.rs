use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    domain::value_objects::checkout_metadata::CheckoutMetadata,
    payments::stripe_client::{
        StripeCheckoutSession, StripeEvent, StripeInvoice, StripeSubscription, unix_to_utc,
    },
};

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const INVOICE_PAID: &str = "invoice.paid";
pub const CUSTOMER_SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const CUSTOMER_SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

/// A verified provider event with its payload decoded for the kinds we act on.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: Option<String>,
    pub event_type: String,
    pub created: Option<DateTime<Utc>>,
    pub livemode: bool,
    pub kind: WebhookEventKind,
}

#[derive(Debug, Clone)]
pub enum WebhookEventKind {
    CheckoutCompleted(CheckoutCompleted),
    InvoicePaid(InvoicePaid),
    SubscriptionUpdated(SubscriptionChange),
    SubscriptionDeleted(SubscriptionChange),
    Unhandled,
}

#[derive(Debug, Clone)]
pub struct CheckoutCompleted {
    pub session_id: String,
    pub mode: Option<String>,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub payment_intent_id: Option<String>,
    pub subscription_id: Option<String>,
    pub payment_status: Option<String>,
    pub amount_total_minor: Option<i64>,
    pub currency: Option<String>,
    pub metadata: CheckoutMetadata,
}

#[derive(Debug, Clone)]
pub struct InvoicePaid {
    pub invoice_id: String,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub amount_paid_minor: Option<i64>,
    pub billing_reason: Option<String>,
}

/// Provider-side snapshot carried by subscription update/delete events.
#[derive(Debug, Clone)]
pub struct SubscriptionChange {
    pub subscription_id: String,
    pub customer_id: Option<String>,
    pub status: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("{event_type} payload does not match the expected object: {source}")]
    Object {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl WebhookEvent {
    pub fn decode(raw: StripeEvent) -> Result<Self, EventDecodeError> {
        let event_type = raw.type_;
        let object = raw.data.object;

        let kind = match event_type.as_str() {
            CHECKOUT_SESSION_COMPLETED => {
                let session: StripeCheckoutSession = parse_object(&event_type, object)?;
                WebhookEventKind::CheckoutCompleted(CheckoutCompleted::from(session))
            }
            INVOICE_PAID => {
                let invoice: StripeInvoice = parse_object(&event_type, object)?;
                WebhookEventKind::InvoicePaid(InvoicePaid::from(invoice))
            }
            CUSTOMER_SUBSCRIPTION_UPDATED => {
                let subscription: StripeSubscription = parse_object(&event_type, object)?;
                WebhookEventKind::SubscriptionUpdated(SubscriptionChange::from(&subscription))
            }
            CUSTOMER_SUBSCRIPTION_DELETED => {
                let subscription: StripeSubscription = parse_object(&event_type, object)?;
                WebhookEventKind::SubscriptionDeleted(SubscriptionChange::from(&subscription))
            }
            _ => WebhookEventKind::Unhandled,
        };

        Ok(Self {
            id: raw.id.filter(|id| !id.is_empty()),
            event_type,
            created: raw.created.and_then(unix_to_utc),
            livemode: raw.livemode,
            kind,
        })
    }

    pub fn is_handled(&self) -> bool {
        !matches!(self.kind, WebhookEventKind::Unhandled)
    }
}

fn parse_object<T: serde::de::DeserializeOwned>(
    event_type: &str,
    object: serde_json::Value,
) -> Result<T, EventDecodeError> {
    serde_json::from_value(object).map_err(|source| EventDecodeError::Object {
        event_type: event_type.to_string(),
        source,
    })
}

impl From<StripeCheckoutSession> for CheckoutCompleted {
    fn from(session: StripeCheckoutSession) -> Self {
        let metadata = session
            .metadata
            .as_ref()
            .map(CheckoutMetadata::from_map)
            .unwrap_or_default();

        let (details_email, details_name) = session
            .customer_details
            .map(|details| (details.email, details.name))
            .unwrap_or_default();

        Self {
            session_id: session.id,
            mode: session.mode,
            customer_id: session.customer,
            customer_email: session.customer_email.or(details_email),
            customer_name: details_name,
            payment_intent_id: session.payment_intent,
            subscription_id: session.subscription,
            payment_status: session.payment_status,
            amount_total_minor: session.amount_total,
            currency: session.currency,
            metadata,
        }
    }
}

impl From<StripeInvoice> for InvoicePaid {
    fn from(invoice: StripeInvoice) -> Self {
        Self {
            invoice_id: invoice.id,
            customer_id: invoice.customer,
            subscription_id: invoice.subscription,
            amount_paid_minor: invoice.amount_paid,
            billing_reason: invoice.billing_reason,
        }
    }
}

impl From<&StripeSubscription> for SubscriptionChange {
    fn from(subscription: &StripeSubscription) -> Self {
        Self {
            subscription_id: subscription.id.clone(),
            customer_id: subscription.customer.clone(),
            status: subscription.status.clone(),
            current_period_start: subscription.period_start().and_then(unix_to_utc),
            current_period_end: subscription.period_end().and_then(unix_to_utc),
            cancel_at_period_end: subscription.cancel_at_period_end,
            canceled_at: subscription.canceled_at.and_then(unix_to_utc),
        }
    }
}
