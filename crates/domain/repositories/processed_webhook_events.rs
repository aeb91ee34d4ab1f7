use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use mockall::automock;

use crate::domain::entities::processed_webhook_events::ProcessedWebhookEventEntity;
use crate::domain::value_objects::enums::event_processing_statuses::EventProcessingStatus;

#[automock]
#[async_trait]
pub trait ProcessedWebhookEventRepository {
    /// Returns true when this caller owns processing of the event: either the
    /// id is new, or its row is `failed`, or it has been `processing` for
    /// longer than `stale_after`.
    async fn try_claim(
        &self,
        event_id: &str,
        event_type: &str,
        stale_after: Duration,
    ) -> Result<bool>;

    async fn find(&self, event_id: &str) -> Result<Option<ProcessedWebhookEventEntity>>;

    async fn complete(
        &self,
        event_id: &str,
        status: EventProcessingStatus,
        outcome: String,
        error: Option<String>,
    ) -> Result<()>;
}
