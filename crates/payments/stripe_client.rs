use std::{collections::BTreeMap, collections::HashMap, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::error;

const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

/// Minimal Stripe client built on reqwest.
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub created: Option<i64>,
    #[serde(default)]
    pub livemode: bool,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// A field Stripe returns either as an id or, when expanded, as the object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

impl<T> Expandable<T> {
    pub fn as_object(&self) -> Option<&T> {
        match self {
            Expandable::Id(_) => None,
            Expandable::Object(object) => Some(object),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub mode: Option<String>,
    pub subscription: Option<String>,
    pub customer: Option<String>,
    pub customer_email: Option<String>,
    pub customer_details: Option<StripeCustomerDetails>,
    pub payment_intent: Option<String>,
    pub payment_status: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomerDetails {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: Option<String>,
    pub status: Option<String>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub billing_cycle_anchor: Option<i64>,
    pub start_date: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<i64>,
    pub latest_invoice: Option<Expandable<StripeInvoice>>,
    #[serde(default)]
    pub items: StripeSubscriptionItems,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StripeSubscriptionItems {
    pub data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub price: Option<StripePrice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
    pub product: Option<Expandable<StripeProduct>>,
    pub recurring: Option<StripeRecurring>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeProduct {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeRecurring {
    pub interval: String,
    pub interval_count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub status: Option<String>,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub amount_paid: Option<i64>,
    pub billing_reason: Option<String>,
    pub period_start: Option<i64>,
    pub period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
    param: Option<String>,
}

/// One-off charge added to the customer's next invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceItemParams {
    pub customer_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceParams {
    pub customer_id: String,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
    pub idempotency_key: String,
}

impl StripeSubscription {
    /// Current period start, falling back to the first item for API versions
    /// that moved period fields onto subscription items.
    pub fn period_start(&self) -> Option<i64> {
        self.current_period_start.or_else(|| {
            self.items
                .data
                .first()
                .and_then(|item| item.current_period_start)
        })
    }

    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end.or_else(|| {
            self.items
                .data
                .first()
                .and_then(|item| item.current_period_end)
        })
    }

    pub fn first_price(&self) -> Option<&StripePrice> {
        self.items.data.first().and_then(|item| item.price.as_ref())
    }

    pub fn latest_invoice(&self) -> Option<&StripeInvoice> {
        self.latest_invoice.as_ref().and_then(Expandable::as_object)
    }
}

impl StripePrice {
    pub fn product_id(&self) -> Option<&str> {
        match self.product.as_ref()? {
            Expandable::Id(id) => Some(id),
            Expandable::Object(product) => Some(&product.id),
        }
    }
}

pub fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

impl StripeClient {
    pub fn new(secret_key: String, api_base: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build stripe http client")?;

        Ok(Self {
            http,
            secret_key,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    async fn ensure_success(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body = resp.text().await.unwrap_or_default();
        let details = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .map(|envelope| envelope.error)
            .ok();

        error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?details.as_ref().and_then(|d| d.type_.as_deref()),
            stripe_error_code = ?details.as_ref().and_then(|d| d.code.as_deref()),
            stripe_error_param = ?details.as_ref().and_then(|d| d.param.as_deref()),
            stripe_error_message = ?details.as_ref().and_then(|d| d.message.as_deref()),
            context = %context,
            "stripe api request failed"
        );

        anyhow::bail!(
            "Stripe API request failed: {} (status {}, request_id={:?})",
            context,
            status,
            request_id
        );
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: Option<&str>,
        context: &str,
    ) -> Result<T> {
        let mut request = self
            .http
            .post(self.endpoint(path))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(form);
        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_KEY, key);
        }

        let resp = request.send().await?;
        let resp = Self::ensure_success(resp, context).await?;
        Ok(resp.json::<T>().await?)
    }

    /// https://stripe.com/docs/api/subscriptions/retrieve
    pub async fn retrieve_subscription(&self, subscription_id: &str) -> Result<StripeSubscription> {
        let resp = self
            .http
            .get(self.endpoint(&format!("subscriptions/{subscription_id}")))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .query(&[
                ("expand[]", "latest_invoice"),
                ("expand[]", "items.data.price.product"),
            ])
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve subscription").await?;

        Ok(resp.json::<StripeSubscription>().await?)
    }

    /// https://stripe.com/docs/api/invoiceitems/create
    pub async fn create_invoice_item(&self, params: &InvoiceItemParams) -> Result<String> {
        let mut form = vec![
            ("customer".to_string(), params.customer_id.clone()),
            ("amount".to_string(), params.amount_minor.to_string()),
            ("currency".to_string(), params.currency.clone()),
            ("description".to_string(), params.description.clone()),
        ];
        form.extend(metadata_form(&params.metadata));

        #[derive(Deserialize)]
        struct InvoiceItemResp {
            id: String,
        }

        let item: InvoiceItemResp = self
            .post_form(
                "invoiceitems",
                &form,
                Some(&params.idempotency_key),
                "create invoice item",
            )
            .await?;
        Ok(item.id)
    }

    /// https://stripe.com/docs/api/invoices/create
    pub async fn create_invoice(&self, params: &InvoiceParams) -> Result<StripeInvoice> {
        let mut form = vec![
            ("customer".to_string(), params.customer_id.clone()),
            (
                "collection_method".to_string(),
                "charge_automatically".to_string(),
            ),
            (
                "pending_invoice_items_behavior".to_string(),
                "include".to_string(),
            ),
            ("auto_advance".to_string(), "false".to_string()),
            ("description".to_string(), params.description.clone()),
        ];
        form.extend(metadata_form(&params.metadata));

        self.post_form(
            "invoices",
            &form,
            Some(&params.idempotency_key),
            "create invoice",
        )
        .await
    }

    /// https://stripe.com/docs/api/invoices/finalize
    pub async fn finalize_invoice(&self, invoice_id: &str) -> Result<StripeInvoice> {
        self.post_form(
            &format!("invoices/{invoice_id}/finalize"),
            &[],
            None,
            "finalize invoice",
        )
        .await
    }

    /// https://stripe.com/docs/api/invoices/pay
    pub async fn pay_invoice(&self, invoice_id: &str) -> Result<StripeInvoice> {
        self.post_form(&format!("invoices/{invoice_id}/pay"), &[], None, "pay invoice")
            .await
    }
}

fn metadata_form(metadata: &BTreeMap<String, String>) -> Vec<(String, String)> {
    metadata
        .iter()
        .map(|(key, value)| (format!("metadata[{key}]"), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn period_falls_back_to_first_item() {
        let subscription: StripeSubscription = serde_json::from_value(json!({
            "id": "sub_1",
            "items": { "data": [
                { "current_period_start": 100, "current_period_end": 200 }
            ]}
        }))
        .unwrap();

        assert_eq!(subscription.period_start(), Some(100));
        assert_eq!(subscription.period_end(), Some(200));
    }

    #[test]
    fn latest_invoice_is_only_available_when_expanded() {
        let collapsed: StripeSubscription = serde_json::from_value(json!({
            "id": "sub_1",
            "latest_invoice": "in_1"
        }))
        .unwrap();
        assert!(collapsed.latest_invoice().is_none());

        let expanded: StripeSubscription = serde_json::from_value(json!({
            "id": "sub_1",
            "latest_invoice": { "id": "in_1", "period_start": 10, "period_end": 20 }
        }))
        .unwrap();
        let invoice = expanded.latest_invoice().unwrap();
        assert_eq!(invoice.period_start, Some(10));
        assert_eq!(invoice.period_end, Some(20));
    }

    #[test]
    fn price_product_id_reads_both_shapes() {
        let price: StripePrice = serde_json::from_value(json!({
            "id": "price_1",
            "product": { "id": "prod_1", "name": "Care plan" }
        }))
        .unwrap();
        assert_eq!(price.product_id(), Some("prod_1"));

        let price: StripePrice =
            serde_json::from_value(json!({ "id": "price_2", "product": "prod_2" })).unwrap();
        assert_eq!(price.product_id(), Some("prod_2"));
    }
}
