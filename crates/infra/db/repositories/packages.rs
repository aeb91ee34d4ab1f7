use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{OptionalExtension, RunQueryDsl, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::packages},
};
use domain::{
    entities::packages::PackageEntity,
    repositories::packages::PackageRepository,
    value_objects::{enums::package_statuses::PackageStatus, write_effects::WriteEffect},
};

pub struct PackagePostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PackagePostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PackageRepository for PackagePostgres {
    async fn find_by_id(&self, package_id: Uuid) -> Result<Option<PackageEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let package = packages::table
            .filter(packages::id.eq(package_id))
            .select(PackageEntity::as_select())
            .first::<PackageEntity>(&mut conn)
            .optional()?;

        Ok(package)
    }

    async fn activate_if_pending(
        &self,
        package_id: Uuid,
        activated_at: DateTime<Utc>,
    ) -> Result<WriteEffect> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = update(
            packages::table
                .filter(packages::id.eq(package_id))
                .filter(packages::status.eq(PackageStatus::Pending.as_str())),
        )
        .set((
            packages::status.eq(PackageStatus::Active.as_str()),
            packages::activated_at.eq(Some(activated_at)),
        ))
        .execute(&mut conn)?;

        Ok(WriteEffect::from_rows_affected(rows))
    }
}
