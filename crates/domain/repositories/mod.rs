pub mod notifications;
pub mod orders;
pub mod packages;
pub mod processed_webhook_events;
pub mod reconciliation_failures;
pub mod subscriptions;
pub mod users;
