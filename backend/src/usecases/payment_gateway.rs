use std::{future::Future, time::Duration};

use anyhow::{Result as AnyResult, anyhow};
use async_trait::async_trait;
use storefront_core::payments::stripe_client::{
    InvoiceItemParams, InvoiceParams, StripeClient, StripeInvoice, StripeSubscription,
};

/// The provider operations the reconciliation engine is allowed to call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StripeGateway: Send + Sync {
    async fn retrieve_subscription(&self, subscription_id: &str) -> AnyResult<StripeSubscription>;

    async fn create_invoice_item(&self, params: InvoiceItemParams) -> AnyResult<String>;

    async fn create_invoice(&self, params: InvoiceParams) -> AnyResult<StripeInvoice>;

    async fn finalize_invoice(&self, invoice_id: &str) -> AnyResult<StripeInvoice>;

    async fn pay_invoice(&self, invoice_id: &str) -> AnyResult<StripeInvoice>;
}

#[async_trait]
impl StripeGateway for StripeClient {
    async fn retrieve_subscription(&self, subscription_id: &str) -> AnyResult<StripeSubscription> {
        self.retrieve_subscription(subscription_id).await
    }

    async fn create_invoice_item(&self, params: InvoiceItemParams) -> AnyResult<String> {
        self.create_invoice_item(&params).await
    }

    async fn create_invoice(&self, params: InvoiceParams) -> AnyResult<StripeInvoice> {
        self.create_invoice(&params).await
    }

    async fn finalize_invoice(&self, invoice_id: &str) -> AnyResult<StripeInvoice> {
        self.finalize_invoice(invoice_id).await
    }

    async fn pay_invoice(&self, invoice_id: &str) -> AnyResult<StripeInvoice> {
        self.pay_invoice(invoice_id).await
    }
}

/// Bounds an outbound call; elapsing the limit is reported as an ordinary error.
pub async fn with_timeout<T, F>(limit: Duration, operation: &'static str, call: F) -> AnyResult<T>
where
    F: Future<Output = AnyResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("{operation} timed out after {}ms", limit.as_millis())),
    }
}
