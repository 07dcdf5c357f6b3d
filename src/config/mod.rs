use std::time::Duration;

use config::{Config, ConfigError, Environment, Source};
use serde::Deserialize;

use crate::usecase::dispatcher::PurgePolicy;

// one year
const MAX_QUEUE_DURATION_MS: u64 = 365 * 24 * 60 * 60 * 1000;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,
    pub jwt_secret: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_queue_duration_ms")]
    pub queue_duration_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_warmup_delay_ms")]
    pub warmup_delay_ms: u64,
    #[serde(default)]
    pub purge_policy: PurgePolicy,
    #[serde(default)]
    pub mail_api_url: Option<String>,
    #[serde(default)]
    pub mail_api_key: String,
    #[serde(default = "default_mail_from")]
    pub mail_from: String,
    #[serde(default = "default_mail_timeout_secs")]
    pub mail_timeout_secs: u64,
    #[serde(default = "default_app_base_url")]
    pub app_base_url: String,
    #[serde(default)]
    pub telemetry_enabled: bool,
    #[serde(default = "default_telemetry_service_name")]
    pub telemetry_service_name: String,
    #[serde(default = "default_telemetry_service_version")]
    pub telemetry_service_version: String,
    #[serde(default = "default_telemetry_environment")]
    pub telemetry_environment: String,
    #[serde(default = "default_telemetry_otlp_endpoint")]
    pub telemetry_otlp_endpoint: String,
}

fn default_database_max_connections() -> u32 {
    5
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_queue_duration_ms() -> u64 {
    3_600_000
}

fn default_poll_interval_ms() -> u64 {
    300_000
}

fn default_warmup_delay_ms() -> u64 {
    10_000
}

fn default_mail_from() -> String {
    "notifications@localhost".to_string()
}

fn default_mail_timeout_secs() -> u64 {
    30
}

fn default_app_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_telemetry_service_name() -> String {
    "trip-notifications".to_string()
}

fn default_telemetry_service_version() -> String {
    "1.0.0".to_string()
}

fn default_telemetry_environment() -> String {
    "production".to_string()
}

fn default_telemetry_otlp_endpoint() -> String {
    "http://otel-collector.observability.svc.cluster.local:4317".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Environment::default())
    }

    fn load<S>(source: S) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        let config: AppConfig = Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;

        if config.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if config.queue_duration_ms > MAX_QUEUE_DURATION_MS {
            return Err(ConfigError::Message(format!(
                "queue_duration_ms must not exceed {}",
                MAX_QUEUE_DURATION_MS
            )));
        }
        Ok(config)
    }

    pub fn queue_duration(&self) -> chrono::Duration {
        i64::try_from(self.queue_duration_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn warmup_delay(&self) -> Duration {
        Duration::from_millis(self.warmup_delay_ms)
    }

    pub fn mail_timeout(&self) -> Duration {
        Duration::from_secs(self.mail_timeout_secs)
    }
}
