pub mod event_processing_statuses;
pub mod order_statuses;
pub mod package_statuses;
pub mod subscription_statuses;
