use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use crate::domain::value_objects::notifications::{
    CustomerWelcomeNotification, InternalOrderNotification,
};

/// Outbound seam to the messaging component. Content and delivery channel
/// are decided on the other side.
#[automock]
#[async_trait]
pub trait NotificationClient {
    async fn notify_internal(&self, notification: InternalOrderNotification) -> Result<()>;

    async fn notify_customer(&self, notification: CustomerWelcomeNotification) -> Result<()>;
}
