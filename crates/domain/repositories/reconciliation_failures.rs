use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::reconciliation_failures::{
    InsertReconciliationFailureEntity, ReconciliationFailureEntity,
};

#[automock]
#[async_trait]
pub trait ReconciliationFailureRepository {
    async fn record(&self, failure: InsertReconciliationFailureEntity) -> Result<Uuid>;

    async fn list_unresolved(&self, limit: i64) -> Result<Vec<ReconciliationFailureEntity>>;
}
