use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::{OptionalExtension, RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::processed_webhook_events},
};
use domain::{
    entities::processed_webhook_events::{
        InsertProcessedWebhookEventEntity, ProcessedWebhookEventEntity,
    },
    repositories::processed_webhook_events::ProcessedWebhookEventRepository,
    value_objects::enums::event_processing_statuses::EventProcessingStatus,
};

pub struct ProcessedWebhookEventPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl ProcessedWebhookEventPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl ProcessedWebhookEventRepository for ProcessedWebhookEventPostgres {
    async fn try_claim(
        &self,
        event_id: &str,
        event_type: &str,
        stale_after: Duration,
    ) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let now = Utc::now();

        let inserted = insert_into(processed_webhook_events::table)
            .values(&InsertProcessedWebhookEventEntity {
                event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                status: EventProcessingStatus::Processing.to_string(),
                claimed_at: now,
            })
            .on_conflict(processed_webhook_events::event_id)
            .do_nothing()
            .execute(&mut conn)?;

        if inserted > 0 {
            return Ok(true);
        }

        // The row lock serialises competing reclaims; only one sees the old status.
        let reclaimed = update(
            processed_webhook_events::table
                .filter(processed_webhook_events::event_id.eq(event_id))
                .filter(
                    processed_webhook_events::status
                        .eq(EventProcessingStatus::Failed.as_str())
                        .or(processed_webhook_events::status
                            .eq(EventProcessingStatus::Processing.as_str())
                            .and(processed_webhook_events::claimed_at.lt(now - stale_after))),
                ),
        )
        .set((
            processed_webhook_events::status.eq(EventProcessingStatus::Processing.as_str()),
            processed_webhook_events::claimed_at.eq(now),
            processed_webhook_events::completed_at.eq(None::<DateTime<Utc>>),
        ))
        .execute(&mut conn)?;

        Ok(reclaimed > 0)
    }

    async fn find(&self, event_id: &str) -> Result<Option<ProcessedWebhookEventEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let event = processed_webhook_events::table
            .filter(processed_webhook_events::event_id.eq(event_id))
            .select(ProcessedWebhookEventEntity::as_select())
            .first::<ProcessedWebhookEventEntity>(&mut conn)
            .optional()?;

        Ok(event)
    }

    async fn complete(
        &self,
        event_id: &str,
        status: EventProcessingStatus,
        outcome: String,
        error: Option<String>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(
            processed_webhook_events::table
                .filter(processed_webhook_events::event_id.eq(event_id)),
        )
        .set((
            processed_webhook_events::status.eq(status.as_str()),
            processed_webhook_events::outcome.eq(Some(outcome)),
            processed_webhook_events::error.eq(error),
            processed_webhook_events::completed_at.eq(Some(Utc::now())),
        ))
        .execute(&mut conn)?;

        Ok(())
    }
}
