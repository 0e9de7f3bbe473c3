//! The compute provider API consumed by the provisioning engine.
//!
//! Four calls cover the whole spot-bidding lifecycle: price history,
//! bid submission, request status lookup, and instance tagging.

use std::future::Future;

use serde::{Deserialize, Serialize};

use spotfleet_core::{InstanceId, LaunchSpecification, RequestId, RequestState, Tag, ZonePrice};

use crate::error::ProviderResult;

/// One spot bid covering `instance_count` instances of the same spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidRequest {
    /// Maximum hourly price.
    pub spot_price: f64,
    pub instance_count: u32,
    /// Unix timestamp (seconds) after which an unfulfilled bid lapses.
    pub valid_until: u64,
    pub launch_specification: LaunchSpecification,
}

/// Provider view of a single spot request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStatus {
    pub request_id: RequestId,
    pub state: RequestState,
    pub status_code: String,
    pub status_message: Option<String>,
    pub instance_id: Option<InstanceId>,
}

/// Spot market operations of a single compute provider.
pub trait ComputeApi {
    /// Current spot prices per zone for an instance type and product.
    fn price_history(
        &self,
        instance_type: &str,
        product_description: &str,
    ) -> impl Future<Output = ProviderResult<Vec<ZonePrice>>> + Send;

    /// Submit a bid; returns one request id per requested instance.
    fn submit_bid(
        &self,
        bid: &BidRequest,
    ) -> impl Future<Output = ProviderResult<Vec<RequestId>>> + Send;

    /// Current status of the given requests.
    fn describe_requests(
        &self,
        request_ids: &[RequestId],
    ) -> impl Future<Output = ProviderResult<Vec<RequestStatus>>> + Send;

    /// Apply `tags` to every instance in `instance_ids`.
    fn create_tags(
        &self,
        instance_ids: &[InstanceId],
        tags: &[Tag],
    ) -> impl Future<Output = ProviderResult<()>> + Send;
}
