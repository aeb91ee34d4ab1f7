mod alert_layer;
mod alert_queue;
mod config;
mod discord_sink;

use std::sync::Arc;

use alert_layer::AlertLayer;
use alert_queue::{AlertQueue, AlertSink};
use anyhow::Result;
use config::ObservabilityConfig;
use discord_sink::DiscordAlertSink;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Installs the global subscriber: env-filtered fmt output plus the optional
/// Discord error-alert layer. Must run inside a tokio runtime.
pub fn init_observability(component: &str) -> Result<()> {
    let config = ObservabilityConfig::from_env(component);
    let mut warnings = config.warnings.clone();

    let alert_layer = config.alerts.as_ref().and_then(|alerts| {
        match DiscordAlertSink::new(alerts.webhook_url.clone()) {
            Ok(sink) => {
                let queue = AlertQueue::spawn(vec![Arc::new(sink) as Arc<dyn AlertSink>]);
                Some(
                    AlertLayer::new(queue, config.service_context.clone(), alerts.min_level)
                        .with_filter(LevelFilter::from_level(alerts.min_level)),
                )
            }
            Err(err) => {
                warnings.push(format!("discord alert sink unavailable: {err}"));
                None
            }
        }
    });
    let alerts_enabled = alert_layer.is_some();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(alert_layer)
        .with(env_filter)
        .try_init()?;

    let context = &config.service_context;
    for warning in &warnings {
        warn!(
            service = %context.service_name,
            environment = %context.environment,
            component = %context.component,
            warning = %warning,
            "observability: config warning"
        );
    }

    info!(
        service = %context.service_name,
        environment = %context.environment,
        component = %context.component,
        alerts_enabled,
        "observability: initialized"
    );

    Ok(())
}
