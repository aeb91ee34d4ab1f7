use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Flat record handed to the messaging service for the internal "new order" alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalOrderNotification {
    pub order_id: Uuid,
    pub order_number: String,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub package_id: Option<Uuid>,
    pub package_name: String,
    pub addons: serde_json::Value,
    pub total_price_minor: i64,
    pub amount_paid_minor: i64,
    pub setup_fee_minor: Option<i64>,
    pub currency: String,
    pub maintenance_required: bool,
    pub stripe_subscription_id: Option<String>,
    pub business_metadata: serde_json::Value,
}

/// Summary handed to the messaging service for the customer welcome email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerWelcomeNotification {
    pub email: String,
    pub customer_name: Option<String>,
    pub order_number: String,
    pub package_name: String,
    pub amount_paid_minor: i64,
    pub currency: String,
    pub maintenance_required: bool,
}
