//! Domain types shared by the provider boundary and the provisioning engine.
//!
//! Requirements, launch specifications, spot request snapshots, zone prices
//! and tags. All types are serializable so fleet reports and simulated
//! provider state can be dumped as JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Provider-assigned identifier of a running instance.
pub type InstanceId = String;

/// Provider-assigned identifier of a spot bid.
pub type RequestId = String;

/// Name of an availability zone, e.g. `us-west-2a`.
pub type ZoneName = String;

/// Status code reported for a fulfilled bid.
pub const STATUS_FULFILLED: &str = "fulfilled";

/// Status code reported for a cancelled bid whose instance kept running.
pub const STATUS_CANCELED_INSTANCE_RUNNING: &str = "request-canceled-and-instance-running";

/// Status code reported for an open bid when the zone has no spare capacity.
pub const STATUS_CAPACITY_OVERSUBSCRIBED: &str = "capacity-oversubscribed";

// ── Requirements ──────────────────────────────────────────────────

/// One line item of a fleet: how many instances of a type, and the
/// highest hourly price we are willing to bid for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRequirement {
    pub instance_type: String,
    #[serde(alias = "number_instances")]
    pub desired_count: u32,
    #[serde(alias = "spot_price")]
    pub max_bid_price: f64,
}

impl InstanceRequirement {
    pub fn new(instance_type: &str, desired_count: u32, max_bid_price: f64) -> Self {
        Self {
            instance_type: instance_type.to_string(),
            desired_count,
            max_bid_price,
        }
    }
}

/// A metadata tag applied to provisioned instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

// ── Pricing ───────────────────────────────────────────────────────

/// A single spot price observation for one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonePrice {
    pub zone: ZoneName,
    /// Hourly price in USD.
    pub price: f64,
    /// Unix timestamp (seconds) of the observation.
    pub observed_at: u64,
}

impl ZonePrice {
    pub fn new(zone: &str, price: f64, observed_at: u64) -> Self {
        Self {
            zone: zone.to_string(),
            price,
            observed_at,
        }
    }
}

// ── Launch specification ──────────────────────────────────────────

/// Block-store volume class for persistent volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeClass {
    /// Provisioned-IOPS volume.
    #[serde(rename = "io1")]
    HighIops,
    /// General-purpose SSD volume.
    #[serde(rename = "gp2")]
    GeneralPurpose,
}

/// A device slot in a launch specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockDeviceMapping {
    /// Instance-store disk, e.g. `/dev/sdb` → `ephemeral0`.
    Ephemeral {
        device_name: String,
        virtual_name: String,
    },
    /// Block-store volume created at launch.
    Persistent {
        device_name: String,
        size_gb: u32,
        volume_class: VolumeClass,
        iops: Option<u32>,
        delete_on_termination: bool,
    },
}

impl BlockDeviceMapping {
    pub fn device_name(&self) -> &str {
        match self {
            Self::Ephemeral { device_name, .. } | Self::Persistent { device_name, .. } => {
                device_name
            }
        }
    }
}

/// Everything the provider needs to start one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpecification {
    pub image_id: String,
    pub key_name: String,
    pub security_group_ids: Vec<String>,
    pub subnet_id: String,
    pub instance_type: String,
    /// Opaque bootstrap payload, passed through untouched.
    pub user_data: String,
    pub block_device_mappings: Vec<BlockDeviceMapping>,
    /// Set when high-IOPS persistent volumes are attached.
    pub ebs_optimized: bool,
}

// ── Spot requests ─────────────────────────────────────────────────

/// Provider-side state of a spot bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Open,
    Active,
    Cancelled,
    Failed,
    /// Any state this controller does not recognise (e.g. `closed`).
    #[serde(other)]
    Unknown,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// The terminal classification of one batch slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotResolution {
    /// The bid produced a running instance.
    Instance(InstanceId),
    Cancelled,
    Failed,
}

impl SlotResolution {
    /// The instance id, if this slot produced a real instance.
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            Self::Instance(id) => Some(id),
            Self::Cancelled | Self::Failed => None,
        }
    }
}

impl fmt::Display for SlotResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(id) => f.write_str(id),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// A spot bid tracked by the poller for one batch slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotRequest {
    pub request_id: RequestId,
    pub batch_slot: usize,
    pub state: RequestState,
    pub status_code: String,
    pub resolution: Option<SlotResolution>,
}

impl SpotRequest {
    /// A freshly submitted bid: open, not yet polled.
    pub fn submitted(request_id: &str, batch_slot: usize) -> Self {
        Self {
            request_id: request_id.to_string(),
            batch_slot,
            state: RequestState::Open,
            status_code: "pending-evaluation".to_string(),
            resolution: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.resolution.is_some()
    }
}
