pub mod reconciliation_failures;
pub mod stripe_webhook;
