use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::domain::value_objects::enums::event_processing_statuses::EventProcessingStatus;
use crate::infra::db::postgres::schema::processed_webhook_events;

#[derive(Debug, Clone, Selectable, Queryable)]
#[diesel(table_name = processed_webhook_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProcessedWebhookEventEntity {
    pub event_id: String,
    pub event_type: String,
    pub status: String,
    pub outcome: Option<String>,
    pub error: Option<String>,
    pub claimed_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessedWebhookEventEntity {
    pub fn processing_status(&self) -> Option<EventProcessingStatus> {
        self.status.parse().ok()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = processed_webhook_events)]
pub struct InsertProcessedWebhookEventEntity {
    pub event_id: String,
    pub event_type: String,
    pub status: String,
    pub claimed_at: DateTime<Utc>,
}
