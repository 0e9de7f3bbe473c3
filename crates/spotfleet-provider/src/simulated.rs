//! In-memory spot market used by the demo binary and by tests.
//!
//! Prices come from a per-type table, optionally a sequence of tables
//! that advances on every lookup. Each submitted request is assigned a
//! [`SimulatedFate`] in submission order, which decides what it reports
//! after a number of open polls. Poll-call failures can be injected, and
//! every bid and tag call is recorded for inspection.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use spotfleet_core::{
    InstanceId, RequestId, RequestState, STATUS_CANCELED_INSTANCE_RUNNING,
    STATUS_CAPACITY_OVERSUBSCRIBED, STATUS_FULFILLED, Tag, ZonePrice,
};

use crate::api::{BidRequest, ComputeApi, RequestStatus};
use crate::error::{ProviderError, ProviderResult};

/// What a simulated request reports once its open polls are used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFate {
    Fulfilled { after_polls: u32 },
    Cancelled { after_polls: u32, instance_running: bool },
    Failed { after_polls: u32 },
    /// Stays open, reporting `capacity-oversubscribed`.
    Oversubscribed { after_polls: u32 },
    /// Stays open forever.
    NeverFulfilled,
}

/// A recorded `create_tags` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCall {
    pub instance_ids: Vec<InstanceId>,
    pub tags: Vec<Tag>,
}

struct SimRequest {
    fate: SimulatedFate,
    polls: u32,
    instance_id: InstanceId,
}

impl SimRequest {
    fn status(&self, request_id: &str) -> RequestStatus {
        let open = |code: &str| RequestStatus {
            request_id: request_id.to_string(),
            state: RequestState::Open,
            status_code: code.to_string(),
            status_message: None,
            instance_id: None,
        };

        match self.fate {
            SimulatedFate::NeverFulfilled => open("pending-fulfillment"),
            SimulatedFate::Fulfilled { after_polls } if self.polls > after_polls => RequestStatus {
                request_id: request_id.to_string(),
                state: RequestState::Active,
                status_code: STATUS_FULFILLED.to_string(),
                status_message: None,
                instance_id: Some(self.instance_id.clone()),
            },
            SimulatedFate::Cancelled {
                after_polls,
                instance_running,
            } if self.polls > after_polls => RequestStatus {
                request_id: request_id.to_string(),
                state: RequestState::Cancelled,
                status_code: if instance_running {
                    STATUS_CANCELED_INSTANCE_RUNNING.to_string()
                } else {
                    "canceled-before-fulfillment".to_string()
                },
                status_message: None,
                instance_id: instance_running.then(|| self.instance_id.clone()),
            },
            SimulatedFate::Failed { after_polls } if self.polls > after_polls => RequestStatus {
                request_id: request_id.to_string(),
                state: RequestState::Failed,
                status_code: "bad-parameters".to_string(),
                status_message: Some("simulated launch failure".to_string()),
                instance_id: None,
            },
            SimulatedFate::Oversubscribed { after_polls } if self.polls > after_polls => {
                open(STATUS_CAPACITY_OVERSUBSCRIBED)
            }
            _ => open("pending-evaluation"),
        }
    }
}

#[derive(Default)]
struct SimState {
    /// Price tables per instance type. The front table is served; it is
    /// dropped after a lookup while later tables remain.
    prices: HashMap<String, VecDeque<Vec<ZonePrice>>>,
    fates: VecDeque<SimulatedFate>,
    default_fate: Option<SimulatedFate>,
    poll_errors: VecDeque<bool>,
    fail_tagging: bool,
    requests: HashMap<RequestId, SimRequest>,
    bids: Vec<BidRequest>,
    tag_calls: Vec<TagCall>,
    describe_calls: u32,
    next_request: u64,
    next_instance: u64,
}

/// In-memory [`ComputeApi`] implementation.
pub struct SimulatedProvider {
    state: Mutex<SimState>,
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProvider {
    /// An empty market where every request is fulfilled on the first poll.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                default_fate: Some(SimulatedFate::Fulfilled { after_polls: 0 }),
                ..Default::default()
            }),
        }
    }

    /// Set the per-zone spot prices for an instance type.
    pub fn with_prices(self, instance_type: &str, prices: &[(&str, f64)]) -> Self {
        self.with_price_sequence(instance_type, &[prices])
    }

    /// Serve a different price table on each lookup for `instance_type`,
    /// in order. The last table stays in effect once the others are used.
    pub fn with_price_sequence(self, instance_type: &str, tables: &[&[(&str, f64)]]) -> Self {
        let now = epoch_secs();
        let tables: VecDeque<Vec<ZonePrice>> = tables
            .iter()
            .map(|table| {
                table
                    .iter()
                    .map(|(zone, price)| ZonePrice::new(zone, *price, now))
                    .collect::<Vec<_>>()
            })
            .collect();
        self.lock().prices.insert(instance_type.to_string(), tables);
        self
    }

    /// Queue fates for the next submitted requests, in order.
    pub fn with_fates(self, fates: &[SimulatedFate]) -> Self {
        self.lock().fates.extend(fates.iter().copied());
        self
    }

    /// Fate for requests submitted after the queue runs dry.
    pub fn with_default_fate(self, fate: SimulatedFate) -> Self {
        self.lock().default_fate = Some(fate);
        self
    }

    /// Fail the next `count` `describe_requests` calls.
    pub fn with_poll_errors(self, count: usize) -> Self {
        self.lock().poll_errors.extend(std::iter::repeat_n(true, count));
        self
    }

    /// Script success (`false`) and failure (`true`) for the next
    /// `describe_requests` calls.
    pub fn with_poll_error_pattern(self, pattern: &[bool]) -> Self {
        self.lock().poll_errors.extend(pattern.iter().copied());
        self
    }

    /// Make every `create_tags` call fail.
    pub fn with_tag_failure(self) -> Self {
        self.lock().fail_tagging = true;
        self
    }

    /// Bids submitted so far.
    pub fn bids(&self) -> Vec<BidRequest> {
        self.lock().bids.clone()
    }

    /// Tag calls received so far.
    pub fn tag_calls(&self) -> Vec<TagCall> {
        self.lock().tag_calls.clone()
    }

    /// Number of `describe_requests` calls, failed ones included.
    pub fn describe_calls(&self) -> u32 {
        self.lock().describe_calls
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A poisoned lock only means a test panicked mid-call.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ComputeApi for SimulatedProvider {
    async fn price_history(
        &self,
        instance_type: &str,
        _product_description: &str,
    ) -> ProviderResult<Vec<ZonePrice>> {
        let mut state = self.lock();
        let Some(tables) = state.prices.get_mut(instance_type) else {
            return Ok(Vec::new());
        };
        let current = if tables.len() > 1 {
            tables.pop_front()
        } else {
            tables.front().cloned()
        };
        Ok(current.unwrap_or_default())
    }

    async fn submit_bid(&self, bid: &BidRequest) -> ProviderResult<Vec<RequestId>> {
        if bid.instance_count == 0 {
            return Err(ProviderError::InvalidRequest(
                "instance count must be greater than 0".to_string(),
            ));
        }

        let mut state = self.lock();
        state.bids.push(bid.clone());

        let mut ids = Vec::with_capacity(bid.instance_count as usize);
        for _ in 0..bid.instance_count {
            let fate = match state.fates.pop_front() {
                Some(fate) => fate,
                None => state
                    .default_fate
                    .unwrap_or(SimulatedFate::Fulfilled { after_polls: 0 }),
            };
            state.next_request += 1;
            state.next_instance += 1;
            let request_id = format!("sir-{:08x}", state.next_request);
            let instance_id = format!("i-{:016x}", state.next_instance);
            state.requests.insert(
                request_id.clone(),
                SimRequest {
                    fate,
                    polls: 0,
                    instance_id,
                },
            );
            ids.push(request_id);
        }

        debug!(
            instance_type = %bid.launch_specification.instance_type,
            count = bid.instance_count,
            "simulated bid accepted"
        );
        Ok(ids)
    }

    async fn describe_requests(&self, request_ids: &[RequestId]) -> ProviderResult<Vec<RequestStatus>> {
        let mut state = self.lock();
        state.describe_calls += 1;

        if state.poll_errors.pop_front().unwrap_or(false) {
            return Err(ProviderError::Throttled(
                "simulated describe failure".to_string(),
            ));
        }

        let mut statuses = Vec::with_capacity(request_ids.len());
        for id in request_ids {
            let request = state
                .requests
                .get_mut(id)
                .ok_or_else(|| ProviderError::NotFound(format!("spot request {id}")))?;
            request.polls += 1;
            statuses.push(request.status(id));
        }
        Ok(statuses)
    }

    async fn create_tags(&self, instance_ids: &[InstanceId], tags: &[Tag]) -> ProviderResult<()> {
        let mut state = self.lock();
        if state.fail_tagging {
            return Err(ProviderError::api("InternalError", "simulated tagging failure"));
        }
        state.tag_calls.push(TagCall {
            instance_ids: instance_ids.to_vec(),
            tags: tags.to_vec(),
        });
        Ok(())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
