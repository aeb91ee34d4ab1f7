pub mod axum_http;
pub mod config;
pub mod usecases;

use std::sync::Arc;

use anyhow::Result;
use storefront_core::{infra::db::postgres::postgres_connection, observability};
use tracing::info;

pub async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    observability::init_observability("backend")?;

    let dotenvy_env = config::config_loader::load()?;
    info!(stage = %dotenvy_env.stage, "ENV has been loaded");

    let postgres_pool = postgres_connection::establish_connection(
        &dotenvy_env.database.url,
        dotenvy_env.database.max_connections,
    )?;
    info!("Postgres connection has been established");

    axum_http::http_serve::start(Arc::new(dotenvy_env), Arc::new(postgres_pool)).await?;

    Ok(())
}
