use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::users::UserEntity;
use crate::domain::value_objects::write_effects::WriteEffect;

#[automock]
#[async_trait]
pub trait UserRepository {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserEntity>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserEntity>>;

    async fn attach_stripe_customer_id(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
    ) -> Result<WriteEffect>;
}
