use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{OptionalExtension, RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::subscriptions},
};
use domain::{
    entities::subscriptions::{
        InsertSubscriptionEntity, SubscriptionEntity, SubscriptionSnapshotChangeset,
    },
    repositories::subscriptions::SubscriptionRepository,
    value_objects::{
        enums::subscription_statuses::SubscriptionStatus,
        write_effects::{InsertOutcome, WriteEffect},
    },
};

pub struct SubscriptionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SubscriptionRepository for SubscriptionPostgres {
    async fn find_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let subscription = subscriptions::table
            .filter(subscriptions::stripe_subscription_id.eq(stripe_subscription_id))
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(subscription)
    }

    async fn insert_if_absent(
        &self,
        subscription: InsertSubscriptionEntity,
    ) -> Result<InsertOutcome> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let inserted = insert_into(subscriptions::table)
            .values(&subscription)
            .on_conflict(subscriptions::stripe_subscription_id)
            .do_nothing()
            .returning(subscriptions::id)
            .get_result::<Uuid>(&mut conn)
            .optional()?;

        if let Some(subscription_id) = inserted {
            return Ok(InsertOutcome::Inserted(subscription_id));
        }

        let existing = subscriptions::table
            .filter(subscriptions::stripe_subscription_id.eq(&subscription.stripe_subscription_id))
            .select(subscriptions::id)
            .first::<Uuid>(&mut conn)?;

        Ok(InsertOutcome::Existing(existing))
    }

    async fn apply_provider_snapshot(
        &self,
        stripe_subscription_id: &str,
        changeset: SubscriptionSnapshotChangeset,
    ) -> Result<WriteEffect> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = update(
            subscriptions::table
                .filter(subscriptions::stripe_subscription_id.eq(stripe_subscription_id)),
        )
        .set(&changeset)
        .execute(&mut conn)?;

        Ok(WriteEffect::from_rows_affected(rows))
    }

    async fn mark_canceled(
        &self,
        stripe_subscription_id: &str,
        canceled_at: DateTime<Utc>,
    ) -> Result<WriteEffect> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = update(
            subscriptions::table
                .filter(subscriptions::stripe_subscription_id.eq(stripe_subscription_id))
                .filter(subscriptions::status.ne(SubscriptionStatus::Canceled.as_str())),
        )
        .set((
            subscriptions::status.eq(SubscriptionStatus::Canceled.as_str()),
            subscriptions::canceled_at.eq(Some(canceled_at)),
            subscriptions::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        Ok(WriteEffect::from_rows_affected(rows))
    }
}
