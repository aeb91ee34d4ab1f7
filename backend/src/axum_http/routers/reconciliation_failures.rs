use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, header::AUTHORIZATION},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storefront_core::domain::{
    entities::reconciliation_failures::ReconciliationFailureEntity,
    repositories::reconciliation_failures::ReconciliationFailureRepository,
};
use tracing::error;
use uuid::Uuid;

use crate::axum_http::error_responses::AppError;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct OpsState {
    failures: Arc<dyn ReconciliationFailureRepository + Send + Sync>,
    api_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ListFailuresQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ReconciliationFailureResponse {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub step: String,
    pub entity_ref: Option<String>,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

impl From<ReconciliationFailureEntity> for ReconciliationFailureResponse {
    fn from(failure: ReconciliationFailureEntity) -> Self {
        Self {
            id: failure.id,
            event_id: failure.event_id,
            event_type: failure.event_type,
            step: failure.step,
            entity_ref: failure.entity_ref,
            error: failure.error,
            created_at: failure.created_at,
        }
    }
}

/// Operator view of unresolved reconciliation failures, newest first.
pub fn routes(
    failures: Arc<dyn ReconciliationFailureRepository + Send + Sync>,
    api_token: String,
) -> Router {
    Router::new()
        .route("/", get(list_unresolved))
        .with_state(OpsState {
            failures,
            api_token,
        })
}

pub async fn list_unresolved(
    State(state): State<OpsState>,
    headers: HeaderMap,
    Query(query): Query<ListFailuresQuery>,
) -> Result<Json<Vec<ReconciliationFailureResponse>>, AppError> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if bearer != Some(state.api_token.as_str()) {
        return Err(AppError::Unauthorized);
    }

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let failures = state.failures.list_unresolved(limit).await.map_err(|err| {
        error!(error = ?err, "ops: failed to list reconciliation failures");
        AppError::Internal(err)
    })?;

    Ok(Json(failures.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use mockall::predicate::eq;
    use storefront_core::domain::repositories::reconciliation_failures::MockReconciliationFailureRepository;
    use tower::ServiceExt;

    fn failure() -> ReconciliationFailureEntity {
        ReconciliationFailureEntity {
            id: Uuid::new_v4(),
            event_id: "evt_1".to_string(),
            event_type: "checkout.session.completed".to_string(),
            step: "setup_fee_invoice".to_string(),
            entity_ref: Some("ord_1".to_string()),
            error: "card_declined".to_string(),
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn lists_failures_with_clamped_limit() {
        let mut repository = MockReconciliationFailureRepository::new();
        repository
            .expect_list_unresolved()
            .with(eq(MAX_LIMIT))
            .times(1)
            .returning(|_| Ok(vec![failure()]));
        let app = routes(Arc::new(repository), "ops-token".to_string());

        let response = app
            .oneshot(get("/?limit=10000", Some("ops-token")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body[0]["step"], "setup_fee_invoice");
    }

    #[tokio::test]
    async fn wrong_token_is_unauthorized() {
        let mut repository = MockReconciliationFailureRepository::new();
        repository.expect_list_unresolved().never();
        let app = routes(Arc::new(repository), "ops-token".to_string());

        let response = app.oneshot(get("/", Some("guess"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
