use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::domain::{
    repositories::notifications::NotificationClient,
    value_objects::notifications::{CustomerWelcomeNotification, InternalOrderNotification},
};

/// Posts notification records to the messaging service as JSON.
///
/// With no base URL configured every call is logged and dropped, which keeps
/// local environments free of outbound traffic.
pub struct MessagingHttpClient {
    http: reqwest::Client,
    base_url: Option<Url>,
    api_token: Option<String>,
}

impl MessagingHttpClient {
    pub fn new(base_url: Option<Url>, api_token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build messaging http client")?;

        Ok(Self {
            http,
            base_url,
            api_token,
        })
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<()> {
        let Some(base_url) = self.base_url.as_ref() else {
            debug!(path, "notifications: messaging base url not configured, skipping");
            return Ok(());
        };

        let url = base_url
            .join(path)
            .with_context(|| format!("invalid messaging path {path}"))?;

        let mut request = self.http.post(url).json(body);
        if let Some(token) = self.api_token.as_deref() {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("messaging request to {path} failed"))?;

        if !response.status().is_success() {
            bail!(
                "messaging service returned {} for {}",
                response.status(),
                path
            );
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationClient for MessagingHttpClient {
    async fn notify_internal(&self, notification: InternalOrderNotification) -> Result<()> {
        self.post("internal/order-paid", &notification).await?;
        info!(
            order_id = %notification.order_id,
            order_number = %notification.order_number,
            "notifications: internal order alert sent"
        );
        Ok(())
    }

    async fn notify_customer(&self, notification: CustomerWelcomeNotification) -> Result<()> {
        self.post("customer/welcome", &notification).await?;
        info!(
            order_number = %notification.order_number,
            "notifications: customer welcome sent"
        );
        Ok(())
    }
}
