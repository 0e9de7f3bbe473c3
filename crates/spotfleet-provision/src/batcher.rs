//! Batched spot bid submission.
//!
//! A requirement's instance count is split into consecutive batches of
//! at most `batch_size`. Each batch is one bid; the provider answers with
//! one request id per instance, and each id becomes a batch slot.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use spotfleet_core::{FleetTimings, LaunchSpecification, SpotRequest};
use spotfleet_provider::{BidRequest, ComputeApi};

use crate::error::{FleetError, FleetResult};
use crate::pricing::ZoneChoice;

/// Batch sizes for `total` instances: `ceil(total / batch_size)` batches,
/// all full except possibly the last.
pub fn plan_batches(total: u32, batch_size: u32) -> Vec<u32> {
    let batch_size = batch_size.max(1);
    let full = total / batch_size;
    let rest = total % batch_size;

    let mut sizes = vec![batch_size; full as usize];
    if rest > 0 {
        sizes.push(rest);
    }
    sizes
}

/// A submitted bid and the slots it opened.
#[derive(Debug, Clone)]
pub struct SubmittedBatch {
    /// Position of this batch within its requirement.
    pub index: usize,
    pub instance_type: String,
    /// Zone the bid was placed in.
    pub zone: ZoneChoice,
    pub requests: Vec<SpotRequest>,
}

impl SubmittedBatch {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Submits one bid per batch.
pub struct FleetRequestBatcher<'a, P> {
    api: &'a P,
    timings: &'a FleetTimings,
}

impl<'a, P: ComputeApi> FleetRequestBatcher<'a, P> {
    pub fn new(api: &'a P, timings: &'a FleetTimings) -> Self {
        Self { api, timings }
    }

    /// Submit a bid for `count` instances of `spec` at `max_bid_price`.
    /// `spec` must target the subnet of `zone`.
    ///
    /// The bid lapses on the provider side after the configured validity
    /// window if it has not been fulfilled. At most `count` slots are
    /// opened whatever the provider answers.
    pub async fn submit(
        &self,
        index: usize,
        zone: &ZoneChoice,
        spec: &LaunchSpecification,
        count: u32,
        max_bid_price: f64,
    ) -> FleetResult<SubmittedBatch> {
        let batch_size = self.timings.batch_size.max(1);
        if count > batch_size {
            return Err(FleetError::BatchTooLarge {
                requested: count,
                batch_size,
            });
        }

        let bid = BidRequest {
            spot_price: max_bid_price,
            instance_count: count,
            valid_until: valid_until(self.timings.bid_validity),
            launch_specification: spec.clone(),
        };

        let mut request_ids = self.api.submit_bid(&bid).await?;
        if request_ids.len() != count as usize {
            warn!(
                instance_type = %spec.instance_type,
                requested = count,
                returned = request_ids.len(),
                "provider returned unexpected number of spot requests"
            );
            request_ids.truncate(count as usize);
        }

        info!(
            instance_type = %spec.instance_type,
            batch = index,
            count,
            zone = %zone.zone,
            subnet = %spec.subnet_id,
            bid_price = max_bid_price,
            "submitted spot bid"
        );

        Ok(SubmittedBatch {
            index,
            instance_type: spec.instance_type.clone(),
            zone: zone.clone(),
            requests: request_ids
                .iter()
                .enumerate()
                .map(|(slot, id)| SpotRequest::submitted(id, slot))
                .collect(),
        })
    }
}

fn valid_until(validity: Duration) -> u64 {
    (SystemTime::now() + validity)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
