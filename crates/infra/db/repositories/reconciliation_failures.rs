use anyhow::Result;
use async_trait::async_trait;
use diesel::{RunQueryDsl, insert_into, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::reconciliation_failures},
};
use domain::{
    entities::reconciliation_failures::{
        InsertReconciliationFailureEntity, ReconciliationFailureEntity,
    },
    repositories::reconciliation_failures::ReconciliationFailureRepository,
};

pub struct ReconciliationFailurePostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl ReconciliationFailurePostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl ReconciliationFailureRepository for ReconciliationFailurePostgres {
    async fn record(&self, failure: InsertReconciliationFailureEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let failure_id = insert_into(reconciliation_failures::table)
            .values(&failure)
            .returning(reconciliation_failures::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(failure_id)
    }

    async fn list_unresolved(&self, limit: i64) -> Result<Vec<ReconciliationFailureEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let failures = reconciliation_failures::table
            .filter(reconciliation_failures::resolved_at.is_null())
            .order(reconciliation_failures::created_at.desc())
            .limit(limit)
            .select(ReconciliationFailureEntity::as_select())
            .load::<ReconciliationFailureEntity>(&mut conn)?;

        Ok(failures)
    }
}
