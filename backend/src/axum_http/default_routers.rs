use axum::{http::StatusCode, response::IntoResponse};

use super::error_responses::AppError;

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub async fn not_found() -> impl IntoResponse {
    AppError::NotFound
}
