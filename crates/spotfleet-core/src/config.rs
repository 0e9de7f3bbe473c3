//! fleet.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::types::{InstanceRequirement, Tag};

/// Product/platform the spot price history is filtered on.
pub const DEFAULT_PRODUCT_DESCRIPTION: &str = "Linux/UNIX (Amazon VPC)";

/// Errors raised while loading or validating a fleet configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse fleet config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("invalid fleet config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub fleet: FleetSection,
    pub network: NetworkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub requirements: Vec<InstanceRequirement>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Ephemeral disk count per instance type, overriding the built-in table.
    #[serde(default)]
    pub disk_layouts: BTreeMap<String, u32>,
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSection {
    pub image_id: String,
    #[serde(default)]
    pub user_data: String,
    /// Path to a bootstrap payload, relative to the config file.
    pub user_data_file: Option<String>,
    #[serde(default = "default_product_description")]
    pub product_description: String,
}

/// Static network layout: the zones we hold subnets in, plus key and
/// security groups. The subnet map doubles as the zone allow-list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub key_name: String,
    pub security_group_ids: Vec<String>,
    /// zone → subnet id
    pub subnets: BTreeMap<String, String>,
}

impl NetworkConfig {
    pub fn allows_zone(&self, zone: &str) -> bool {
        self.subnets.contains_key(zone)
    }

    pub fn subnet_for(&self, zone: &str) -> Option<&str> {
        self.subnets.get(zone).map(String::as_str)
    }

    pub fn zones(&self) -> impl Iterator<Item = &str> {
        self.subnets.keys().map(String::as_str)
    }
}

/// Raw timing knobs as written in fleet.toml (`"10s"`, `"10m"`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub batch_size: u32,
    pub settle_delay: String,
    pub poll_interval: String,
    pub error_retry_delay: String,
    pub max_consecutive_poll_errors: u32,
    pub bid_validity: String,
    /// Wall-clock bound on one batch's poll loop. Unbounded when absent.
    pub poll_deadline: Option<String>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            settle_delay: "10s".to_string(),
            poll_interval: "20s".to_string(),
            error_retry_delay: "10s".to_string(),
            max_consecutive_poll_errors: 3,
            bid_validity: "10m".to_string(),
            poll_deadline: None,
        }
    }
}

impl TimingConfig {
    /// Parse the duration strings into a `FleetTimings`.
    pub fn resolve(&self) -> Result<FleetTimings, ConfigError> {
        let poll_deadline = match &self.poll_deadline {
            Some(s) => Some(parse_field("poll_deadline", s)?),
            None => None,
        };
        Ok(FleetTimings {
            batch_size: self.batch_size,
            settle_delay: parse_field("settle_delay", &self.settle_delay)?,
            poll_interval: parse_field("poll_interval", &self.poll_interval)?,
            error_retry_delay: parse_field("error_retry_delay", &self.error_retry_delay)?,
            max_consecutive_poll_errors: self.max_consecutive_poll_errors,
            bid_validity: parse_field("bid_validity", &self.bid_validity)?,
            poll_deadline,
        })
    }
}

/// Resolved timing and batching parameters for the provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetTimings {
    /// Maximum bids submitted per batch.
    pub batch_size: u32,
    /// Wait after submission before the first poll.
    pub settle_delay: Duration,
    /// Wait between successful poll rounds.
    pub poll_interval: Duration,
    /// Wait after a failed poll call.
    pub error_retry_delay: Duration,
    /// Consecutive poll-call errors that abort a batch.
    pub max_consecutive_poll_errors: u32,
    /// How long a bid stays valid on the provider side.
    pub bid_validity: Duration,
    pub poll_deadline: Option<Duration>,
}

impl Default for FleetTimings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            settle_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(20),
            error_retry_delay: Duration::from_secs(10),
            max_consecutive_poll_errors: 3,
            bid_validity: Duration::from_secs(600),
            poll_deadline: None,
        }
    }
}

/// Persistent block-store volumes attached to every instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub volume_count: u32,
    pub size_gb: u32,
    /// Requesting IOPS switches the volumes to the high-IOPS class.
    pub iops: Option<u32>,
}

impl FleetConfig {
    /// Load and validate a fleet file. `user_data_file` is resolved
    /// relative to the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: FleetConfig = toml::from_str(&content)?;

        if let Some(file) = &config.fleet.user_data_file {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            let payload_path = base.join(file);
            config.fleet.user_data =
                std::fs::read_to_string(&payload_path).map_err(|source| ConfigError::Io {
                    path: payload_path.display().to_string(),
                    source,
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fleet.image_id.is_empty() {
            return Err(ConfigError::Invalid("fleet.image_id is empty".to_string()));
        }
        if self.network.subnets.is_empty() {
            return Err(ConfigError::Invalid(
                "network.subnets must list at least one zone".to_string(),
            ));
        }
        if self.timing.batch_size == 0 {
            return Err(ConfigError::Invalid("timing.batch_size must be > 0".to_string()));
        }
        if self.timing.max_consecutive_poll_errors == 0 {
            return Err(ConfigError::Invalid(
                "timing.max_consecutive_poll_errors must be > 0".to_string(),
            ));
        }
        for req in &self.requirements {
            if !(req.max_bid_price > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "bid price for {} must be positive",
                    req.instance_type
                )));
            }
        }
        self.timing.resolve()?;
        Ok(())
    }

    /// Tags in key order.
    pub fn tag_set(&self) -> Vec<Tag> {
        self.tags.iter().map(|(k, v)| Tag::new(k, v)).collect()
    }
}

fn default_product_description() -> String {
    DEFAULT_PRODUCT_DESCRIPTION.to_string()
}

fn parse_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration written as an integer and an optional unit: `ms`,
/// `s` (the default), `m` or `h`. Values that overflow are rejected.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits.parse().ok()?;

    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "" | "s" => Some(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        "h" => value.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}
