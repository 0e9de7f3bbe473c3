//! Fleet build results.

use serde::{Deserialize, Serialize};

use spotfleet_core::{InstanceId, SlotResolution};

use crate::poller::BatchOutcome;
use crate::pricing::ZoneChoice;

/// How a single requirement ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementOutcome {
    /// Bids were placed and every batch reached a terminal state.
    Provisioned,
    /// No allowed zone was affordable; nothing was bid.
    NoEligibleZone,
    /// Some batches were placed, then no allowed zone was affordable and
    /// the remaining batches were not bid.
    Interrupted,
    /// Zero instances were requested.
    Skipped,
}

/// Result of provisioning one requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementReport {
    pub instance_type: String,
    pub desired_count: u32,
    pub max_bid_price: f64,
    pub outcome: RequirementOutcome,
    pub batches: Vec<BatchOutcome>,
}

impl RequirementReport {
    /// Zone of the first batch, if any batch was placed.
    pub fn zone(&self) -> Option<&ZoneChoice> {
        self.batches.first().map(|b| &b.zone)
    }

    /// Every distinct zone bid into, in first-use order.
    pub fn zones(&self) -> Vec<&str> {
        let mut zones: Vec<&str> = Vec::new();
        for batch in &self.batches {
            if !zones.contains(&batch.zone.zone.as_str()) {
                zones.push(&batch.zone.zone);
            }
        }
        zones
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.batches.iter().flat_map(BatchOutcome::instance_ids).collect()
    }

    pub fn cancelled(&self) -> usize {
        self.count(&SlotResolution::Cancelled)
    }

    pub fn failed(&self) -> usize {
        self.count(&SlotResolution::Failed)
    }

    /// True when every requested instance is running.
    pub fn is_complete(&self) -> bool {
        self.instance_ids().len() == self.desired_count as usize
    }

    fn count(&self, resolution: &SlotResolution) -> usize {
        self.batches.iter().map(|b| b.count(resolution)).sum()
    }
}

/// Result of a whole fleet build, one entry per requirement in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetReport {
    pub requirements: Vec<RequirementReport>,
}

impl FleetReport {
    /// Every running instance id across all requirements.
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.requirements
            .iter()
            .flat_map(RequirementReport::instance_ids)
            .collect()
    }

    /// Requirements that were aborted without bidding.
    pub fn aborted(&self) -> impl Iterator<Item = &RequirementReport> {
        self.requirements
            .iter()
            .filter(|r| r.outcome == RequirementOutcome::NoEligibleZone)
    }

    pub fn is_complete(&self) -> bool {
        self.requirements.iter().all(RequirementReport::is_complete)
    }
}
