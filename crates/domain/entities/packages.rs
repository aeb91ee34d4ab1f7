use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::value_objects::enums::package_statuses::PackageStatus;
use crate::infra::db::postgres::schema::packages;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = packages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PackageEntity {
    pub id: Uuid,
    pub name: String,
    pub price_minor: i64,
    pub addons: serde_json::Value,
    pub maintenance_required: bool,
    pub is_custom: bool,
    pub status: String,
    pub user_id: Option<Uuid>,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PackageEntity {
    pub fn package_status(&self) -> PackageStatus {
        self.status.parse().unwrap_or_default()
    }
}
