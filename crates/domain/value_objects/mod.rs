pub mod checkout_metadata;
pub mod enums;
pub mod notifications;
pub mod reconciliation;
pub mod write_effects;
