pub mod billing_period;
pub mod checkout_completed;
pub mod entity_resolver;
pub mod event_router;
pub mod idempotency;
pub mod payment_gateway;
pub mod setup_fee;
pub mod side_effects;
pub mod stripe_webhook;
pub mod subscription_events;

#[cfg(test)]
pub mod test_support;
