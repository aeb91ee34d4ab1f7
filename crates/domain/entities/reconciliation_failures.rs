use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::reconciliation_failures;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = reconciliation_failures)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ReconciliationFailureEntity {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub step: String,
    pub entity_ref: Option<String>,
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable)]
#[diesel(table_name = reconciliation_failures)]
pub struct InsertReconciliationFailureEntity {
    pub event_id: String,
    pub event_type: String,
    pub step: String,
    pub entity_ref: Option<String>,
    pub error: String,
}
