use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{OptionalExtension, RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::orders},
};
use domain::{
    entities::orders::{
        CheckoutRefs, InsertOrderEntity, ORDER_NUMBER_ATTEMPTS, OrderEntity, order_number_variant,
    },
    repositories::orders::OrderRepository,
    value_objects::{
        enums::order_statuses::OrderStatus,
        write_effects::{InsertOutcome, WriteEffect},
    },
};

pub struct OrderPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl OrderPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl OrderRepository for OrderPostgres {
    async fn find_by_id(&self, order_id: Uuid) -> Result<Option<OrderEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let order = orders::table
            .filter(orders::id.eq(order_id))
            .select(OrderEntity::as_select())
            .first::<OrderEntity>(&mut conn)
            .optional()?;

        Ok(order)
    }

    async fn find_by_stripe_session_id(&self, session_id: &str) -> Result<Option<OrderEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let order = orders::table
            .filter(orders::stripe_session_id.eq(session_id))
            .select(OrderEntity::as_select())
            .first::<OrderEntity>(&mut conn)
            .optional()?;

        Ok(order)
    }

    async fn insert_paid_order_if_absent(&self, order: InsertOrderEntity) -> Result<InsertOutcome> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let session_id = order
            .stripe_session_id
            .clone()
            .ok_or_else(|| anyhow!("paid order insert needs a checkout session id"))?;
        let base_number = order.order_number.clone();
        let mut candidate = order;

        for attempt in 0..ORDER_NUMBER_ATTEMPTS {
            candidate.order_number = order_number_variant(&base_number, attempt);

            let inserted = insert_into(orders::table)
                .values(&candidate)
                .on_conflict_do_nothing()
                .returning(orders::id)
                .get_result::<Uuid>(&mut conn)
                .optional()?;
            if let Some(order_id) = inserted {
                return Ok(InsertOutcome::Inserted(order_id));
            }

            let existing = orders::table
                .filter(orders::stripe_session_id.eq(&session_id))
                .select(orders::id)
                .first::<Uuid>(&mut conn)
                .optional()?;
            if let Some(order_id) = existing {
                return Ok(InsertOutcome::Existing(order_id));
            }

            warn!(
                session_id = %session_id,
                order_number = %candidate.order_number,
                "orders: order number already taken by another session"
            );
        }

        Err(anyhow!(
            "no free order number for session {session_id} after {ORDER_NUMBER_ATTEMPTS} attempts"
        ))
    }

    async fn attach_checkout_refs(
        &self,
        order_id: Uuid,
        refs: CheckoutRefs,
    ) -> Result<WriteEffect> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = update(
            orders::table
                .filter(orders::id.eq(order_id))
                .filter(orders::stripe_session_id.is_null()),
        )
        .set((
            orders::stripe_session_id.eq(Some(refs.stripe_session_id)),
            orders::stripe_payment_intent_id.eq(refs.stripe_payment_intent_id),
            orders::stripe_subscription_id.eq(refs.stripe_subscription_id),
            orders::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        Ok(WriteEffect::from_rows_affected(rows))
    }

    async fn link_user_if_absent(&self, order_id: Uuid, user_id: Uuid) -> Result<WriteEffect> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = update(
            orders::table
                .filter(orders::id.eq(order_id))
                .filter(orders::user_id.is_null()),
        )
        .set((
            orders::user_id.eq(Some(user_id)),
            orders::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        Ok(WriteEffect::from_rows_affected(rows))
    }

    async fn link_subscription_if_absent(
        &self,
        order_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<WriteEffect> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = update(
            orders::table
                .filter(orders::id.eq(order_id))
                .filter(orders::subscription_id.is_null()),
        )
        .set((
            orders::subscription_id.eq(Some(subscription_id)),
            orders::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        Ok(WriteEffect::from_rows_affected(rows))
    }

    async fn mark_paid(
        &self,
        order_id: Uuid,
        amount_paid_minor: i64,
        paid_at: DateTime<Utc>,
    ) -> Result<WriteEffect> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = update(
            orders::table
                .filter(orders::id.eq(order_id))
                .filter(orders::status.ne(OrderStatus::Paid.as_str())),
        )
        .set((
            orders::status.eq(OrderStatus::Paid.as_str()),
            orders::amount_paid_minor.eq(Some(amount_paid_minor)),
            orders::paid_at.eq(Some(paid_at)),
            orders::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        Ok(WriteEffect::from_rows_affected(rows))
    }

    async fn record_setup_fee(&self, order_id: Uuid, amount_paid_minor: i64) -> Result<WriteEffect> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = update(
            orders::table.filter(orders::id.eq(order_id)).filter(
                orders::amount_paid_minor
                    .is_null()
                    .or(orders::amount_paid_minor.lt(amount_paid_minor)),
            ),
        )
        .set((
            orders::amount_paid_minor.eq(Some(amount_paid_minor)),
            orders::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        Ok(WriteEffect::from_rows_affected(rows))
    }
}
