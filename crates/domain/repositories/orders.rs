use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::orders::{CheckoutRefs, InsertOrderEntity, OrderEntity};
use crate::domain::value_objects::write_effects::{InsertOutcome, WriteEffect};

#[automock]
#[async_trait]
pub trait OrderRepository {
    async fn find_by_id(&self, order_id: Uuid) -> Result<Option<OrderEntity>>;

    async fn find_by_stripe_session_id(&self, session_id: &str) -> Result<Option<OrderEntity>>;

    /// Inserts unless an order already carries the same checkout session id.
    /// An order number taken by a different session is retried with a suffix.
    async fn insert_paid_order_if_absent(&self, order: InsertOrderEntity) -> Result<InsertOutcome>;

    /// Records session, payment intent and subscription ids unless a session id is already set.
    async fn attach_checkout_refs(&self, order_id: Uuid, refs: CheckoutRefs)
    -> Result<WriteEffect>;

    async fn link_user_if_absent(&self, order_id: Uuid, user_id: Uuid) -> Result<WriteEffect>;

    async fn link_subscription_if_absent(
        &self,
        order_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<WriteEffect>;

    async fn mark_paid(
        &self,
        order_id: Uuid,
        amount_paid_minor: i64,
        paid_at: DateTime<Utc>,
    ) -> Result<WriteEffect>;

    /// Raises the recorded amount paid to include a setup fee. Applies only
    /// while the stored amount is lower, so a fee is never counted twice.
    async fn record_setup_fee(&self, order_id: Uuid, amount_paid_minor: i64)
    -> Result<WriteEffect>;
}
