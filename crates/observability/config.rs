use tracing::Level;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ServiceContext {
    pub(crate) service_name: String,
    pub(crate) environment: String,
    pub(crate) component: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AlertSinkConfig {
    pub(crate) webhook_url: Url,
    pub(crate) min_level: Level,
}

#[derive(Debug, Clone)]
pub(crate) struct ObservabilityConfig {
    pub(crate) service_context: ServiceContext,
    pub(crate) alerts: Option<AlertSinkConfig>,
    /// Collected while parsing and logged once tracing is up.
    pub(crate) warnings: Vec<String>,
}

impl ObservabilityConfig {
    pub(crate) fn from_env(component: &str) -> Self {
        Self::from_lookup(component, |key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(component: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let component = component.trim().to_string();
        let service_context = ServiceContext {
            service_name: value("SERVICE_NAME").unwrap_or_else(|| component.clone()),
            environment: value("STAGE").unwrap_or_else(|| "unknown".to_string()),
            component,
        };

        let mut warnings = Vec::new();
        let enabled = match value("ALERTS_ENABLED") {
            None => true,
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                warnings.push(format!(
                    "ALERTS_ENABLED is not a boolean (value: {raw}); keeping alerts enabled"
                ));
                true
            }),
        };

        let webhook_url = match value("ALERT_DISCORD_WEBHOOK_URL") {
            Some(raw) if enabled => match Url::parse(&raw) {
                Ok(url) => Some(url),
                Err(err) => {
                    // The raw URL embeds a credential, keep it out of the log.
                    warnings.push(format!(
                        "ALERT_DISCORD_WEBHOOK_URL is invalid ({err}); error alerts disabled"
                    ));
                    None
                }
            },
            _ => None,
        };

        let alerts = webhook_url.map(|webhook_url| {
            let min_level = match value("ALERT_MIN_LEVEL") {
                None => Level::ERROR,
                Some(raw) => parse_level(&raw).unwrap_or_else(|| {
                    warnings.push(format!(
                        "ALERT_MIN_LEVEL is invalid (value: {raw}); defaulting to ERROR"
                    ));
                    Level::ERROR
                }),
            };
            AlertSinkConfig {
                webhook_url,
                min_level,
            }
        });

        Self {
            service_context,
            alerts,
            warnings,
        }
    }
}

fn parse_level(input: &str) -> Option<Level> {
    match input.to_ascii_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        _ => None,
    }
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
