use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::{Result as AnyResult, anyhow};
use storefront_core::payments::stripe_client::{InvoiceItemParams, InvoiceParams, StripeInvoice};
use tracing::info;
use uuid::Uuid;

use super::payment_gateway::{StripeGateway, with_timeout};

pub struct SetupFeeRequest<'a> {
    pub order_id: Uuid,
    pub order_number: &'a str,
    pub stripe_customer_id: &'a str,
    pub amount_minor: i64,
    pub currency: &'a str,
}

/// Bills a one-time setup fee as its own invoice: item, invoice, finalize, pay.
///
/// Creation calls are keyed by order id, so a redelivered checkout replays the
/// provider's stored responses instead of charging twice.
pub struct SetupFeeBiller {
    stripe: Arc<dyn StripeGateway>,
    timeout: Duration,
}

impl SetupFeeBiller {
    pub fn new(stripe: Arc<dyn StripeGateway>, timeout: Duration) -> Self {
        Self { stripe, timeout }
    }

    /// Returns the amount actually collected, `None` when the invoice was
    /// issued but is still awaiting payment.
    pub async fn charge(&self, request: SetupFeeRequest<'_>) -> AnyResult<Option<i64>> {
        let order_id = request.order_id;
        let metadata = BTreeMap::from([
            ("order_id".to_string(), order_id.to_string()),
            ("order_number".to_string(), request.order_number.to_string()),
            ("kind".to_string(), "setup_fee".to_string()),
        ]);
        let description = format!("Setup fee for order {}", request.order_number);

        let item_id = with_timeout(
            self.timeout,
            "create setup fee invoice item",
            self.stripe.create_invoice_item(InvoiceItemParams {
                customer_id: request.stripe_customer_id.to_string(),
                amount_minor: request.amount_minor,
                currency: request.currency.to_string(),
                description: description.clone(),
                metadata: metadata.clone(),
                idempotency_key: format!("setup-fee-item-{order_id}"),
            }),
        )
        .await?;

        let invoice = with_timeout(
            self.timeout,
            "create setup fee invoice",
            self.stripe.create_invoice(InvoiceParams {
                customer_id: request.stripe_customer_id.to_string(),
                description,
                metadata,
                idempotency_key: format!("setup-fee-invoice-{order_id}"),
            }),
        )
        .await?;
        info!(
            %order_id,
            invoice_item_id = %item_id,
            invoice_id = %invoice.id,
            "checkout: setup fee invoice created"
        );

        let invoice = self.settle(invoice).await?;
        match invoice.status.as_deref() {
            Some("paid") => Ok(Some(invoice.amount_paid.unwrap_or(request.amount_minor))),
            Some("open") => Ok(None),
            other => Err(anyhow!(
                "setup fee invoice {} ended in status {:?}",
                invoice.id,
                other
            )),
        }
    }

    async fn settle(&self, invoice: StripeInvoice) -> AnyResult<StripeInvoice> {
        let invoice = if invoice.status.as_deref() == Some("draft") {
            with_timeout(
                self.timeout,
                "finalize setup fee invoice",
                self.stripe.finalize_invoice(&invoice.id),
            )
            .await?
        } else {
            invoice
        };

        if invoice.status.as_deref() == Some("open") {
            return with_timeout(
                self.timeout,
                "pay setup fee invoice",
                self.stripe.pay_invoice(&invoice.id),
            )
            .await;
        }
        Ok(invoice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::payment_gateway::MockStripeGateway;
    use mockall::predicate::eq;

    fn invoice(status: &str, amount_paid: Option<i64>) -> StripeInvoice {
        StripeInvoice {
            id: "in_setup".to_string(),
            status: Some(status.to_string()),
            customer: Some("cus_1".to_string()),
            subscription: None,
            amount_paid,
            billing_reason: Some("manual".to_string()),
            period_start: None,
            period_end: None,
        }
    }

    fn request(order_id: Uuid) -> SetupFeeRequest<'static> {
        SetupFeeRequest {
            order_id,
            order_number: "ORD-20240101-ABCDEFGH",
            stripe_customer_id: "cus_1",
            amount_minor: 4900,
            currency: "usd",
        }
    }

    #[tokio::test]
    async fn draft_invoice_is_finalized_and_paid_with_order_scoped_keys() {
        let order_id = Uuid::new_v4();
        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_create_invoice_item()
            .withf(move |params| {
                params.idempotency_key == format!("setup-fee-item-{order_id}")
                    && params.amount_minor == 4900
                    && params.customer_id == "cus_1"
            })
            .times(1)
            .returning(|_| Ok("ii_1".to_string()));
        stripe
            .expect_create_invoice()
            .withf(move |params| params.idempotency_key == format!("setup-fee-invoice-{order_id}"))
            .times(1)
            .returning(|_| Ok(invoice("draft", None)));
        stripe
            .expect_finalize_invoice()
            .with(eq("in_setup"))
            .times(1)
            .returning(|_| Ok(invoice("open", None)));
        stripe
            .expect_pay_invoice()
            .with(eq("in_setup"))
            .times(1)
            .returning(|_| Ok(invoice("paid", Some(4900))));

        let charged = SetupFeeBiller::new(Arc::new(stripe), Duration::from_secs(1))
            .charge(request(order_id))
            .await
            .unwrap();

        assert_eq!(charged, Some(4900));
    }

    #[tokio::test]
    async fn replayed_invoice_that_is_already_paid_is_not_paid_again() {
        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_create_invoice_item()
            .returning(|_| Ok("ii_1".to_string()));
        stripe
            .expect_create_invoice()
            .returning(|_| Ok(invoice("paid", Some(4900))));
        stripe.expect_finalize_invoice().never();
        stripe.expect_pay_invoice().never();

        let charged = SetupFeeBiller::new(Arc::new(stripe), Duration::from_secs(1))
            .charge(request(Uuid::new_v4()))
            .await
            .unwrap();

        assert_eq!(charged, Some(4900));
    }

    #[tokio::test]
    async fn declined_payment_is_an_error() {
        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_create_invoice_item()
            .returning(|_| Ok("ii_1".to_string()));
        stripe
            .expect_create_invoice()
            .returning(|_| Ok(invoice("open", None)));
        stripe
            .expect_pay_invoice()
            .returning(|_| Err(anyhow!("card_declined")));

        let result = SetupFeeBiller::new(Arc::new(stripe), Duration::from_secs(1))
            .charge(request(Uuid::new_v4()))
            .await;

        assert!(result.is_err());
    }
}
