use std::{fmt::Display, str::FromStr};

use anyhow::{Context, Result, anyhow};
use tracing::warn;
use url::Url;

use super::{
    config_model::{Database, DotEnvyConfig, Notifications, Reconciliation, Server, Stripe},
    stage::Stage,
};

const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const LIVE_KEY_PREFIXES: [&str; 2] = ["sk_live_", "rk_live_"];

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let stage = get_stage();

    let server = Server {
        port: required_parsed("SERVER_PORT")?,
        body_limit: required_parsed("SERVER_BODY_LIMIT")?,
        timeout: required_parsed("SERVER_TIMEOUT")?,
    };

    let database = Database {
        url: required("DATABASE_URL")?,
        max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", 10)?,
    };

    let secret_key = required("STRIPE_SECRET_KEY")?;
    let allow_test_signature = test_signature_allowed(
        parsed_or("STRIPE_ALLOW_TEST_SIGNATURE", false)?,
        stage,
        &secret_key,
    );
    let stripe = Stripe {
        webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
        api_base: Url::parse(
            &optional("STRIPE_API_BASE").unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_string()),
        )
        .context("STRIPE_API_BASE is not a valid URL")?,
        request_timeout_secs: parsed_or("STRIPE_REQUEST_TIMEOUT_SECS", 10)?,
        signature_tolerance_secs: parsed_or("STRIPE_SIGNATURE_TOLERANCE_SECS", 300)?,
        allow_test_signature,
        secret_key,
    };

    let notifications = Notifications {
        base_url: optional("MESSAGING_BASE_URL")
            .map(|raw| normalize_base_url(&raw))
            .transpose()
            .context("MESSAGING_BASE_URL is not a valid URL")?,
        api_token: optional("MESSAGING_API_TOKEN"),
        timeout_secs: parsed_or("NOTIFICATION_TIMEOUT_SECS", 5)?,
    };
    if notifications.base_url.is_none() {
        warn!("config: MESSAGING_BASE_URL is not set, notifications will only be logged");
    }

    let reconciliation = Reconciliation {
        event_stale_minutes: parsed_or("WEBHOOK_EVENT_STALE_MINUTES", 30)?,
        ops_api_token: optional("OPS_API_TOKEN"),
    };

    Ok(DotEnvyConfig {
        server,
        database,
        stripe,
        notifications,
        reconciliation,
        stage,
    })
}

pub fn get_stage() -> Stage {
    dotenvy::dotenv().ok();

    let stage_str = std::env::var("STAGE").unwrap_or_default();
    Stage::try_from(&stage_str).unwrap_or_default()
}

/// The unsigned test literal is only honoured outside production and never
/// alongside a live Stripe key.
pub fn test_signature_allowed(requested: bool, stage: Stage, secret_key: &str) -> bool {
    if !requested {
        return false;
    }
    if stage == Stage::Production {
        warn!("config: STRIPE_ALLOW_TEST_SIGNATURE ignored in production");
        return false;
    }
    if LIVE_KEY_PREFIXES
        .iter()
        .any(|prefix| secret_key.starts_with(prefix))
    {
        warn!("config: STRIPE_ALLOW_TEST_SIGNATURE ignored with a live Stripe key");
        return false;
    }
    true
}

/// `Url::join` drops the last path segment unless the base ends with `/`.
pub fn normalize_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.ends_with('/') {
        Ok(Url::parse(trimmed)?)
    } else {
        Ok(Url::parse(&format!("{trimmed}/"))?)
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| anyhow!("{name} is invalid"))
}

fn required_parsed<T>(name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = required(name)?;
    raw.parse()
        .map_err(|err| anyhow!("{name} is invalid: {err}"))
}

fn parsed_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match optional(name) {
        Some(raw) => raw
            .parse()
            .map_err(|err| anyhow!("{name} is invalid: {err}")),
        None => Ok(default),
    }
}
