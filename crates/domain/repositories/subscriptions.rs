use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;

use crate::domain::entities::subscriptions::{
    InsertSubscriptionEntity, SubscriptionEntity, SubscriptionSnapshotChangeset,
};
use crate::domain::value_objects::write_effects::{InsertOutcome, WriteEffect};

#[automock]
#[async_trait]
pub trait SubscriptionRepository {
    async fn find_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<SubscriptionEntity>>;

    /// Inserts unless a row already exists for the provider subscription id.
    async fn insert_if_absent(
        &self,
        subscription: InsertSubscriptionEntity,
    ) -> Result<InsertOutcome>;

    /// `AlreadyApplied` means no row matched the provider id.
    async fn apply_provider_snapshot(
        &self,
        stripe_subscription_id: &str,
        changeset: SubscriptionSnapshotChangeset,
    ) -> Result<WriteEffect>;

    async fn mark_canceled(
        &self,
        stripe_subscription_id: &str,
        canceled_at: DateTime<Utc>,
    ) -> Result<WriteEffect>;
}
