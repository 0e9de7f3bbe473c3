//! spotfleet-core — domain types and fleet configuration.

pub mod config;
pub mod types;

pub use config::{
    ConfigError, FleetConfig, FleetSection, FleetTimings, NetworkConfig, StorageConfig,
    TimingConfig, parse_duration,
};
pub use types::*;
