use url::Url;

use super::stage::Stage;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub server: Server,
    pub database: Database,
    pub stripe: Stripe,
    pub notifications: Notifications,
    pub reconciliation: Reconciliation,
    pub stage: Stage,
}

#[derive(Debug, Clone)]
pub struct Server {
    pub port: u16,
    /// MiB
    pub body_limit: u64,
    /// Seconds
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone)]
pub struct Stripe {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: Url,
    pub request_timeout_secs: u64,
    pub signature_tolerance_secs: i64,
    pub allow_test_signature: bool,
}

// Keys stay out of logs.
impl std::fmt::Debug for Stripe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stripe")
            .field("api_base", &self.api_base.as_str())
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("signature_tolerance_secs", &self.signature_tolerance_secs)
            .field("allow_test_signature", &self.allow_test_signature)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct Notifications {
    pub base_url: Option<Url>,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for Notifications {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifications")
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct Reconciliation {
    pub event_stale_minutes: i64,
    pub ops_api_token: Option<String>,
}

impl std::fmt::Debug for Reconciliation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciliation")
            .field("event_stale_minutes", &self.event_stale_minutes)
            .field("ops_api_enabled", &self.ops_api_token.is_some())
            .finish()
    }
}
