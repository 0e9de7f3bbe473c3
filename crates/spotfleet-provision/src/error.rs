//! Provisioning error types.

use thiserror::Error;

use spotfleet_core::ConfigError;
use spotfleet_provider::ProviderError;

/// Errors that can occur while provisioning a fleet.
#[derive(Debug, Error)]
pub enum FleetError {
    /// No allowed zone has a positive spot price at or below the bid cap.
    /// An expected outcome: the requirement is skipped, not retried.
    #[error("no eligible zone for {instance_type} at bid {max_bid_price}")]
    NoEligibleZone {
        instance_type: String,
        max_bid_price: f64,
    },

    #[error("zone {0} has no configured subnet")]
    UnknownZone(String),

    #[error("disk layout error: {0}")]
    DiskLayout(String),

    #[error("batch of {requested} exceeds batch size {batch_size}")]
    BatchTooLarge { requested: u32, batch_size: u32 },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl FleetError {
    /// Whether this is an expected market outcome rather than a fault.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::NoEligibleZone { .. })
    }
}

pub type FleetResult<T> = Result<T, FleetError>;
