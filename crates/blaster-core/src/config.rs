use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8090;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// A job may lag behind its `scheduled_at` by this much before it counts as missed.
pub const DEFAULT_GRACE_SECS: u64 = 60;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_COUNTRY_PREFIX: &str = "62";

/// Top-level config (blaster.toml + BLASTER_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlasterConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Missing section means no transport client is available; every job fails fast.
    #[serde(default)]
    pub transport: Option<TransportConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub phone: PhoneConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Where uploaded attachment files live. Job attachment paths are relative to `root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

/// HTTP bridge in front of the WhatsApp automation client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub base_url: String,
    /// Sent as `Authorization: Bearer <api_key>` when set.
    pub api_key: Option<String>,
    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Capacity of the fired-job queue feeding the delivery worker.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            grace_secs: DEFAULT_GRACE_SECS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Pacing knobs applied by the delivery throttler. Global for every job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Fixed pause between consecutive reachability checks.
    #[serde(default = "default_validation_delay_ms")]
    pub validation_delay_ms: u64,
    /// Jitter window between two recipients. The max is also the post-error backoff.
    #[serde(default = "default_message_delay_min_ms")]
    pub message_delay_min_ms: u64,
    #[serde(default = "default_message_delay_max_ms")]
    pub message_delay_max_ms: u64,
    /// Jitter window between two parts sent to the same recipient.
    #[serde(default = "default_attachment_delay_min_ms")]
    pub attachment_delay_min_ms: u64,
    #[serde(default = "default_attachment_delay_max_ms")]
    pub attachment_delay_max_ms: u64,
    /// Recipients per batch; 0 disables batch pauses.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_pause_secs")]
    pub batch_pause_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            validation_delay_ms: default_validation_delay_ms(),
            message_delay_min_ms: default_message_delay_min_ms(),
            message_delay_max_ms: default_message_delay_max_ms(),
            attachment_delay_min_ms: default_attachment_delay_min_ms(),
            attachment_delay_max_ms: default_attachment_delay_max_ms(),
            batch_size: default_batch_size(),
            batch_pause_secs: default_batch_pause_secs(),
        }
    }
}

impl ThrottleConfig {
    /// No pacing at all. Handy for tests and local dry runs.
    pub fn disabled() -> Self {
        Self {
            validation_delay_ms: 0,
            message_delay_min_ms: 0,
            message_delay_max_ms: 0,
            attachment_delay_min_ms: 0,
            attachment_delay_max_ms: 0,
            batch_size: 0,
            batch_pause_secs: 0,
        }
    }
}

/// Phone number rules: `country_prefix` followed by a bounded run of subscriber digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneConfig {
    #[serde(default = "default_country_prefix")]
    pub country_prefix: String,
    #[serde(default = "default_min_digits")]
    pub min_subscriber_digits: usize,
    #[serde(default = "default_max_digits")]
    pub max_subscriber_digits: usize,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            country_prefix: DEFAULT_COUNTRY_PREFIX.to_string(),
            min_subscriber_digits: default_min_digits(),
            max_subscriber_digits: default_max_digits(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_transport_timeout() -> u64 {
    30
}
fn default_grace_secs() -> u64 {
    DEFAULT_GRACE_SECS
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_validation_delay_ms() -> u64 {
    1_000
}
fn default_message_delay_min_ms() -> u64 {
    4_000
}
fn default_message_delay_max_ms() -> u64 {
    8_000
}
fn default_attachment_delay_min_ms() -> u64 {
    1_000
}
fn default_attachment_delay_max_ms() -> u64 {
    3_000
}
fn default_batch_size() -> usize {
    20
}
fn default_batch_pause_secs() -> u64 {
    300
}
fn default_country_prefix() -> String {
    DEFAULT_COUNTRY_PREFIX.to_string()
}
fn default_min_digits() -> usize {
    8
}
fn default_max_digits() -> usize {
    13
}

fn blaster_home() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.blaster", home)
}
fn default_db_path() -> String {
    format!("{}/blaster.db", blaster_home())
}
fn default_storage_root() -> String {
    format!("{}/uploads", blaster_home())
}

impl BlasterConfig {
    /// Load config from a TOML file with BLASTER_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g. `BLASTER_THROTTLE__BATCH_SIZE=50`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::BlasterError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("BLASTER_").split("__"))
    }
}

fn default_config_path() -> String {
    format!("{}/blaster.toml", blaster_home())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("blaster.toml", "")?;
            let cfg: BlasterConfig = BlasterConfig::figment("blaster.toml").extract()?;
            assert_eq!(cfg.gateway.port, DEFAULT_PORT);
            assert_eq!(cfg.scheduler.grace_secs, 60);
            assert_eq!(cfg.throttle.batch_size, 20);
            assert_eq!(cfg.throttle.batch_pause_secs, 300);
            assert_eq!(cfg.phone.country_prefix, "62");
            assert!(cfg.transport.is_none());
            Ok(())
        });
    }

    #[test]
    fn toml_and_env_overrides_merge() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "blaster.toml",
                r#"
                [transport]
                base_url = "http://localhost:3000"

                [throttle]
                batch_size = 10
                "#,
            )?;
            jail.set_env("BLASTER_THROTTLE__BATCH_PAUSE_SECS", "60");
            let cfg: BlasterConfig = BlasterConfig::figment("blaster.toml").extract()?;
            let transport = cfg.transport.expect("transport section");
            assert_eq!(transport.base_url, "http://localhost:3000");
            assert_eq!(transport.timeout_secs, 30);
            assert_eq!(cfg.throttle.batch_size, 10);
            assert_eq!(cfg.throttle.batch_pause_secs, 60);
            assert_eq!(cfg.throttle.message_delay_max_ms, 8_000);
            Ok(())
        });
    }
}
