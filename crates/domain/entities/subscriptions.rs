use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::value_objects::enums::subscription_statuses::SubscriptionStatus;
use crate::infra::db::postgres::schema::subscriptions;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = subscriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SubscriptionEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub package_id: Uuid,
    pub order_id: Option<Uuid>,
    pub stripe_subscription_id: String,
    pub stripe_customer_id: String,
    pub stripe_price_id: Option<String>,
    pub stripe_product_id: Option<String>,
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub package_name: String,
    pub business_name: Option<String>,
    pub business_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionEntity {
    pub fn subscription_status(&self) -> SubscriptionStatus {
        self.status.parse().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = subscriptions)]
pub struct InsertSubscriptionEntity {
    pub user_id: Uuid,
    pub package_id: Uuid,
    pub order_id: Option<Uuid>,
    pub stripe_subscription_id: String,
    pub stripe_customer_id: String,
    pub stripe_price_id: Option<String>,
    pub stripe_product_id: Option<String>,
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub package_name: String,
    pub business_name: Option<String>,
    pub business_metadata: serde_json::Value,
}

/// Latest provider snapshot. `None` leaves the stored column untouched;
/// `canceled_at: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, AsChangeset)]
#[diesel(table_name = subscriptions)]
pub struct SubscriptionSnapshotChangeset {
    pub status: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: Option<bool>,
    pub canceled_at: Option<Option<DateTime<Utc>>>,
    pub updated_at: Option<DateTime<Utc>>,
}
