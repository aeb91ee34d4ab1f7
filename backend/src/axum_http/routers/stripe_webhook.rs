use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
};
use chrono::Duration as ChronoDuration;
use serde::Serialize;
use storefront_core::{
    infra::{
        db::{
            postgres::postgres_connection::PgPoolSquad,
            repositories::{
                orders::OrderPostgres, packages::PackagePostgres,
                processed_webhook_events::ProcessedWebhookEventPostgres,
                reconciliation_failures::ReconciliationFailurePostgres,
                subscriptions::SubscriptionPostgres, users::UserPostgres,
            },
        },
        notifications::messaging_http::MessagingHttpClient,
    },
    payments::{stripe_client::StripeClient, webhook_signature::WebhookVerifier},
};

use crate::{
    axum_http::error_responses::AppError,
    config::config_model::DotEnvyConfig,
    usecases::{
        checkout_completed::CheckoutCompletedHandler,
        entity_resolver::ReconciliationRepositories,
        event_router::EventRouter,
        idempotency::IdempotencyGuard,
        side_effects::SideEffectDispatcher,
        stripe_webhook::{StripeWebhookUseCase, WebhookError},
        subscription_events::SubscriptionEventsHandler,
    },
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookReceived {
    pub received: bool,
}

pub fn routes(config: &DotEnvyConfig, db_pool: Arc<PgPoolSquad>) -> Result<Router> {
    let repos = ReconciliationRepositories {
        orders: Arc::new(OrderPostgres::new(Arc::clone(&db_pool))),
        packages: Arc::new(PackagePostgres::new(Arc::clone(&db_pool))),
        subscriptions: Arc::new(SubscriptionPostgres::new(Arc::clone(&db_pool))),
        users: Arc::new(UserPostgres::new(Arc::clone(&db_pool))),
    };
    let provider_timeout = Duration::from_secs(config.stripe.request_timeout_secs);
    let stripe = StripeClient::new(
        config.stripe.secret_key.clone(),
        config.stripe.api_base.to_string(),
        provider_timeout,
    )?;
    let notifications = MessagingHttpClient::new(
        config.notifications.base_url.clone(),
        config.notifications.api_token.clone(),
        Duration::from_secs(config.notifications.timeout_secs),
    )?;

    let stripe_webhook_usecase = StripeWebhookUseCase::new(
        WebhookVerifier::new(
            config.stripe.webhook_secret.clone(),
            ChronoDuration::seconds(config.stripe.signature_tolerance_secs),
            config.stripe.allow_test_signature,
        ),
        IdempotencyGuard::new(
            Arc::new(ProcessedWebhookEventPostgres::new(Arc::clone(&db_pool))),
            ChronoDuration::minutes(config.reconciliation.event_stale_minutes),
        ),
        EventRouter::new(
            CheckoutCompletedHandler::new(repos.clone(), Arc::new(stripe), provider_timeout),
            SubscriptionEventsHandler::new(Arc::clone(&repos.subscriptions)),
        ),
        SideEffectDispatcher::new(
            Arc::new(notifications),
            Duration::from_secs(config.notifications.timeout_secs),
        ),
        Arc::new(ReconciliationFailurePostgres::new(Arc::clone(&db_pool))),
    );

    Ok(router(Arc::new(stripe_webhook_usecase)))
}

pub fn router(stripe_webhook_usecase: Arc<StripeWebhookUseCase>) -> Router {
    Router::new()
        .route("/stripe", post(receive_stripe_event))
        .with_state(stripe_webhook_usecase)
}

pub async fn receive_stripe_event(
    State(stripe_webhook_usecase): State<Arc<StripeWebhookUseCase>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match stripe_webhook_usecase.handle(&body, signature).await {
        Ok(_) => Ok(Json(WebhookReceived { received: true })),
        Err(err @ WebhookError::MissingSignature) => Err(AppError::BadRequest(err.to_string())),
        Err(WebhookError::Verification(err)) => Err(AppError::BadRequest(err.to_string())),
        Err(err @ WebhookError::InFlight(_)) => Err(AppError::Conflict(err.to_string())),
    }
}
