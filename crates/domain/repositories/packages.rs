use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::packages::PackageEntity;
use crate::domain::value_objects::write_effects::WriteEffect;

#[automock]
#[async_trait]
pub trait PackageRepository {
    async fn find_by_id(&self, package_id: Uuid) -> Result<Option<PackageEntity>>;

    async fn activate_if_pending(
        &self,
        package_id: Uuid,
        activated_at: DateTime<Utc>,
    ) -> Result<WriteEffect>;
}
