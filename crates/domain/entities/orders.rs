use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::value_objects::enums::order_statuses::OrderStatus;
use crate::infra::db::postgres::schema::orders;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderEntity {
    pub id: Uuid,
    pub order_number: String,
    pub package_id: Option<Uuid>,
    pub package_name: String,
    pub package_price_minor: i64,
    pub addons: serde_json::Value,
    pub total_price_minor: i64,
    pub amount_paid_minor: Option<i64>,
    pub currency: String,
    pub status: String,
    pub user_id: Option<Uuid>,
    pub contact_email: String,
    pub business_metadata: serde_json::Value,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub subscription_id: Option<Uuid>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderEntity {
    pub fn order_status(&self) -> OrderStatus {
        self.status.parse().unwrap_or_default()
    }

    pub fn is_paid(&self) -> bool {
        self.order_status() == OrderStatus::Paid
    }

    /// `businessName` from the intake form, when the customer gave one.
    pub fn business_name(&self) -> Option<String> {
        self.business_metadata
            .get("businessName")
            .and_then(|value| value.as_str())
            .map(str::to_string)
    }
}

/// Orders created by the reconciliation engine are born `paid`.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = orders)]
pub struct InsertOrderEntity {
    pub order_number: String,
    pub package_id: Option<Uuid>,
    pub package_name: String,
    pub package_price_minor: i64,
    pub addons: serde_json::Value,
    pub total_price_minor: i64,
    pub amount_paid_minor: Option<i64>,
    pub currency: String,
    pub status: String,
    pub user_id: Option<Uuid>,
    pub contact_email: String,
    pub business_metadata: serde_json::Value,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// How many order numbers to try before giving up on an insert.
pub const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// The order number to use on the given insert attempt. The first attempt
/// keeps the derived number; later ones append `-2`, `-3`, ... so that two
/// sessions sharing a tail on the same day both get a row.
pub fn order_number_variant(base: &str, attempt: usize) -> String {
    match attempt {
        0 => base.to_string(),
        n => format!("{base}-{}", n + 1),
    }
}

/// Provider references recorded on an order the first time its checkout completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRefs {
    pub stripe_session_id: String,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_number_gains_a_suffix_after_the_first_attempt() {
        let base = "ORD-20240309-C3D4E5F6";

        assert_eq!(order_number_variant(base, 0), "ORD-20240309-C3D4E5F6");
        assert_eq!(order_number_variant(base, 1), "ORD-20240309-C3D4E5F6-2");
        assert_eq!(order_number_variant(base, 2), "ORD-20240309-C3D4E5F6-3");
    }
}
