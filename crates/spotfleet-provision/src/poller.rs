//! Fulfillment polling — drives one batch's spot requests to a terminal
//! classification.
//!
//! ```text
//! submitted ──settle delay──▶ polling ──▶ fulfilled  (instance id)
//!                               │   ▲ ──▶ cancelled  (instance id if still running)
//!                               │   │ ──▶ failed
//!                               └───┘ open: poll again after the interval
//! ```
//!
//! A failed poll call counts against a consecutive-error budget that
//! resets on every successful poll. When the budget is exhausted, or the
//! optional deadline passes, every unresolved slot is marked failed.

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use spotfleet_core::{
    FleetTimings, InstanceId, RequestState, STATUS_CANCELED_INSTANCE_RUNNING,
    STATUS_CAPACITY_OVERSUBSCRIBED, STATUS_FULFILLED, SlotResolution, SpotRequest,
};
use spotfleet_provider::{ComputeApi, RequestStatus};

use crate::batcher::SubmittedBatch;
use crate::pricing::ZoneChoice;

/// Tracks consecutive failed poll calls for one batch.
#[derive(Debug)]
pub struct ErrorBudget {
    consecutive_errors: u32,
    limit: u32,
}

impl ErrorBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            consecutive_errors: 0,
            limit: limit.max(1),
        }
    }

    /// Record a failed poll. Returns true once the budget is exhausted.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_errors += 1;
        self.is_exhausted()
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.consecutive_errors >= self.limit
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }
}

/// Classify one polled request. `None` means keep polling.
pub fn classify(status: &RequestStatus) -> Option<SlotResolution> {
    match status.state {
        RequestState::Active if status.status_code == STATUS_FULFILLED => {
            match &status.instance_id {
                Some(id) => Some(SlotResolution::Instance(id.clone())),
                None => {
                    warn!(
                        request_id = %status.request_id,
                        "fulfilled request reported no instance id"
                    );
                    None
                }
            }
        }
        RequestState::Cancelled => {
            if status.status_code == STATUS_CANCELED_INSTANCE_RUNNING {
                if let Some(id) = &status.instance_id {
                    return Some(SlotResolution::Instance(id.clone()));
                }
            }
            Some(SlotResolution::Cancelled)
        }
        RequestState::Failed => Some(SlotResolution::Failed),
        RequestState::Open if status.status_code == STATUS_CAPACITY_OVERSUBSCRIBED => {
            Some(SlotResolution::Failed)
        }
        RequestState::Open | RequestState::Active | RequestState::Unknown => None,
    }
}

/// Why a batch's poll loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchTermination {
    /// Every slot reached a terminal classification.
    Resolved,
    /// Too many consecutive poll errors; open slots were marked failed.
    ErrorBudgetExhausted,
    /// The poll deadline passed; open slots were marked failed.
    DeadlineExceeded,
}

/// Final state of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub index: usize,
    /// Zone the batch's bid was placed in.
    pub zone: ZoneChoice,
    pub requests: Vec<SpotRequest>,
    pub termination: BatchTermination,
    pub poll_rounds: u32,
}

impl BatchOutcome {
    /// Per-slot resolutions in slot order.
    pub fn resolutions(&self) -> Vec<SlotResolution> {
        self.requests
            .iter()
            .map(|r| r.resolution.clone().unwrap_or(SlotResolution::Failed))
            .collect()
    }

    /// Real instance ids, sentinels excluded.
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.requests
            .iter()
            .filter_map(|r| r.resolution.as_ref()?.instance_id().map(str::to_string))
            .collect()
    }

    pub fn count(&self, resolution: &SlotResolution) -> usize {
        self.requests
            .iter()
            .filter(|r| r.resolution.as_ref() == Some(resolution))
            .count()
    }
}

/// Polls a batch until it is terminal.
pub struct FulfillmentPoller<'a, P> {
    api: &'a P,
    timings: &'a FleetTimings,
}

impl<'a, P: ComputeApi> FulfillmentPoller<'a, P> {
    pub fn new(api: &'a P, timings: &'a FleetTimings) -> Self {
        Self { api, timings }
    }

    /// Poll `batch` until every slot is terminal, the error budget runs
    /// out, or the deadline (if configured) passes. A deadline too far out
    /// to represent is treated as no deadline.
    pub async fn resolve(&self, batch: SubmittedBatch) -> BatchOutcome {
        let deadline = self
            .timings
            .poll_deadline
            .and_then(|d| Instant::now().checked_add(d));
        let mut requests = batch.requests;
        let mut budget = ErrorBudget::new(self.timings.max_consecutive_poll_errors);
        let mut poll_rounds = 0;

        // Give the provider time to register the bid.
        sleep(self.timings.settle_delay).await;

        let termination = loop {
            let pending: Vec<String> = requests
                .iter()
                .filter(|r| !r.is_terminal())
                .map(|r| r.request_id.clone())
                .collect();

            if pending.is_empty() {
                break BatchTermination::Resolved;
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(
                    instance_type = %batch.instance_type,
                    batch = batch.index,
                    unresolved = pending.len(),
                    "poll deadline exceeded; open bids may still be fulfilled until they expire"
                );
                break BatchTermination::DeadlineExceeded;
            }

            poll_rounds += 1;
            match self.api.describe_requests(&pending).await {
                Err(e) => {
                    let exhausted = budget.record_failure();
                    warn!(
                        instance_type = %batch.instance_type,
                        batch = batch.index,
                        error = %e,
                        consecutive_errors = budget.consecutive_errors(),
                        "failed to describe spot requests"
                    );
                    if exhausted {
                        break BatchTermination::ErrorBudgetExhausted;
                    }
                    sleep(self.timings.error_retry_delay).await;
                }
                Ok(statuses) => {
                    budget.record_success();
                    apply_statuses(&mut requests, &statuses);

                    if requests.iter().any(|r| !r.is_terminal()) {
                        debug!(
                            instance_type = %batch.instance_type,
                            batch = batch.index,
                            round = poll_rounds,
                            "spot requests still open"
                        );
                        sleep(self.timings.poll_interval).await;
                    }
                }
            }
        };

        if termination != BatchTermination::Resolved {
            for request in requests.iter_mut().filter(|r| !r.is_terminal()) {
                request.resolution = Some(SlotResolution::Failed);
            }
        }

        let outcome = BatchOutcome {
            index: batch.index,
            zone: batch.zone,
            requests,
            termination,
            poll_rounds,
        };

        info!(
            instance_type = %batch.instance_type,
            batch = batch.index,
            running = outcome.instance_ids().len(),
            cancelled = outcome.count(&SlotResolution::Cancelled),
            failed = outcome.count(&SlotResolution::Failed),
            zone = %outcome.zone.zone,
            termination = ?outcome.termination,
            "batch resolved"
        );
        outcome
    }
}

/// Fold one poll round into the slot array. Terminal slots are never
/// reclassified.
fn apply_statuses(requests: &mut [SpotRequest], statuses: &[RequestStatus]) {
    for status in statuses {
        let Some(request) = requests
            .iter_mut()
            .find(|r| r.request_id == status.request_id)
        else {
            warn!(request_id = %status.request_id, "status for unknown spot request");
            continue;
        };
        if request.is_terminal() {
            continue;
        }

        request.state = status.state;
        request.status_code = status.status_code.clone();

        let resolution = classify(status);
        match &resolution {
            Some(SlotResolution::Instance(id)) => info!(
                request_id = %status.request_id,
                state = %status.state,
                status = %status.status_code,
                instance_id = %id,
                "spot request resolved to instance"
            ),
            Some(SlotResolution::Cancelled) => warn!(
                request_id = %status.request_id,
                status = %status.status_code,
                "spot request cancelled"
            ),
            Some(SlotResolution::Failed) => warn!(
                request_id = %status.request_id,
                state = %status.state,
                status = %status.status_code,
                fault = status.status_message.as_deref().unwrap_or(""),
                "spot request failed"
            ),
            None => debug!(
                request_id = %status.request_id,
                state = %status.state,
                status = %status.status_code,
                "spot request pending"
            ),
        }
        request.resolution = resolution;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(state: RequestState, code: &str, instance: Option<&str>) -> RequestStatus {
        RequestStatus {
            request_id: "sir-1".to_string(),
            state,
            status_code: code.to_string(),
            status_message: None,
            instance_id: instance.map(str::to_string),
        }
    }

    #[test]
    fn active_fulfilled_resolves_to_instance() {
        let s = status(RequestState::Active, STATUS_FULFILLED, Some("i-7"));
        assert_eq!(classify(&s), Some(SlotResolution::Instance("i-7".to_string())));
    }

    #[test]
    fn cancelled_but_running_keeps_instance() {
        let s = status(
            RequestState::Cancelled,
            STATUS_CANCELED_INSTANCE_RUNNING,
            Some("i-8"),
        );
        assert_eq!(classify(&s), Some(SlotResolution::Instance("i-8".to_string())));
    }

    #[test]
    fn cancelled_otherwise_is_sentinel() {
        let s = status(RequestState::Cancelled, "canceled-before-fulfillment", None);
        assert_eq!(classify(&s), Some(SlotResolution::Cancelled));
    }

    #[test]
    fn failed_is_terminal() {
        let s = status(RequestState::Failed, "bad-parameters", None);
        assert_eq!(classify(&s), Some(SlotResolution::Failed));
    }

    #[test]
    fn oversubscribed_open_fails_immediately() {
        let s = status(RequestState::Open, STATUS_CAPACITY_OVERSUBSCRIBED, None);
        assert_eq!(classify(&s), Some(SlotResolution::Failed));
    }

    #[test]
    fn open_and_unknown_keep_polling() {
        assert_eq!(classify(&status(RequestState::Open, "pending-evaluation", None)), None);
        assert_eq!(classify(&status(RequestState::Unknown, "closed", None)), None);
        // Active without fulfilled status is not yet usable.
        assert_eq!(
            classify(&status(RequestState::Active, "pending-fulfillment", Some("i-1"))),
            None
        );
    }

    #[test]
    fn error_budget_exhausts_after_limit() {
        let mut budget = ErrorBudget::new(3);
        assert!(!budget.record_failure());
        assert!(!budget.record_failure());
        assert!(budget.record_failure());
        assert!(budget.is_exhausted());
    }

    #[test]
    fn error_budget_resets_on_success() {
        let mut budget = ErrorBudget::new(3);
        budget.record_failure();
        budget.record_failure();
        budget.record_success();
        assert_eq!(budget.consecutive_errors(), 0);
        assert!(!budget.record_failure());
        assert!(!budget.record_failure());
        assert!(budget.record_failure());
    }

    #[test]
    fn terminal_slots_are_not_reclassified() {
        let mut requests = vec![SpotRequest::submitted("sir-1", 0)];
        apply_statuses(
            &mut requests,
            &[status(RequestState::Active, STATUS_FULFILLED, Some("i-1"))],
        );
        apply_statuses(
            &mut requests,
            &[status(RequestState::Cancelled, "instance-terminated-by-price", None)],
        );
        assert_eq!(
            requests[0].resolution,
            Some(SlotResolution::Instance("i-1".to_string()))
        );
        assert_eq!(requests[0].state, RequestState::Active);
    }

    #[tokio::test]
    async fn unrepresentable_deadline_means_no_deadline() {
        use spotfleet_core::LaunchSpecification;
        use spotfleet_provider::SimulatedProvider;

        use crate::batcher::FleetRequestBatcher;

        let provider = SimulatedProvider::new();
        let timings = FleetTimings {
            settle_delay: std::time::Duration::ZERO,
            poll_interval: std::time::Duration::ZERO,
            poll_deadline: Some(std::time::Duration::from_secs(u64::MAX)),
            ..Default::default()
        };
        let spec = LaunchSpecification {
            image_id: "ami-1".to_string(),
            key_name: "key".to_string(),
            security_group_ids: vec!["sg-1".to_string()],
            subnet_id: "subnet-a".to_string(),
            instance_type: "m4.large".to_string(),
            user_data: String::new(),
            block_device_mappings: Vec::new(),
            ebs_optimized: false,
        };
        let zone = ZoneChoice {
            zone: "us-west-2a".to_string(),
            price: 0.1,
        };

        let batch = FleetRequestBatcher::new(&provider, &timings)
            .submit(0, &zone, &spec, 2, 0.5)
            .await
            .unwrap();
        let outcome = FulfillmentPoller::new(&provider, &timings).resolve(batch).await;

        assert_eq!(outcome.termination, BatchTermination::Resolved);
        assert_eq!(outcome.instance_ids().len(), 2);
        assert_eq!(outcome.zone, zone);
    }

    #[test]
    fn outcome_instance_ids_skip_sentinels() {
        let mut requests: Vec<SpotRequest> = (0..3)
            .map(|i| SpotRequest::submitted(&format!("sir-{i}"), i))
            .collect();
        requests[0].resolution = Some(SlotResolution::Cancelled);
        requests[1].resolution = Some(SlotResolution::Instance("i-2".to_string()));
        requests[2].resolution = Some(SlotResolution::Failed);

        let outcome = BatchOutcome {
            index: 0,
            zone: ZoneChoice {
                zone: "us-west-2a".to_string(),
                price: 0.1,
            },
            requests,
            termination: BatchTermination::Resolved,
            poll_rounds: 1,
        };
        assert_eq!(outcome.instance_ids(), vec!["i-2".to_string()]);
        assert_eq!(
            outcome.resolutions(),
            vec![
                SlotResolution::Cancelled,
                SlotResolution::Instance("i-2".to_string()),
                SlotResolution::Failed
            ]
        );
    }
}
