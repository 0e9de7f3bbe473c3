//! Fleet controller — provisions an ordered list of instance requirements.
//!
//! Each requirement runs to completion before the next one starts, one
//! batch at a time. Every batch looks up prices afresh, picks its zone,
//! builds the launch specification for it, then submits, polls and tags.
//! A batch that polled for minutes does not pin the next one to a zone
//! the market has since moved away from.
//!
//! A requirement with no affordable zone for its first batch is skipped
//! and the build moves on. When a later batch finds no affordable zone,
//! the requirement stops there: resolved batches are kept and the rest
//! are not bid. Provider faults (price lookup, bid submission, tagging) abort the
//! build. Instances already running at that point are left running and
//! billed; there is no rollback of provisioned capacity.

use tracing::{info, warn};

use spotfleet_core::{FleetConfig, FleetTimings, InstanceRequirement, Tag};
use spotfleet_provider::ComputeApi;

use crate::batcher::{FleetRequestBatcher, plan_batches};
use crate::error::{FleetError, FleetResult};
use crate::launch::{DiskLayoutTable, LaunchSpecBuilder};
use crate::poller::{BatchTermination, FulfillmentPoller};
use crate::pricing::PriceOracle;
use crate::report::{FleetReport, RequirementOutcome, RequirementReport};
use crate::tagger::Tagger;

/// Orchestrates zone selection, bidding, polling and tagging.
pub struct FleetController<P> {
    api: P,
    launch: LaunchSpecBuilder,
    product_description: String,
    tags: Vec<Tag>,
    timings: FleetTimings,
}

impl<P: ComputeApi> FleetController<P> {
    /// Create a controller from a fleet configuration, validating it first.
    pub fn new(api: P, config: &FleetConfig) -> FleetResult<Self> {
        config.validate()?;
        let timings = config.timing.resolve()?;
        let layouts = DiskLayoutTable::builtin().with_overrides(&config.disk_layouts);
        let launch = LaunchSpecBuilder::new(
            &config.fleet.image_id,
            &config.fleet.user_data,
            config.network.clone(),
            layouts,
            config.storage.clone(),
        )?;

        Ok(Self {
            api,
            launch,
            product_description: config.fleet.product_description.clone(),
            tags: config.tag_set(),
            timings,
        })
    }

    /// Override the resolved timings. A zero batch size or error limit
    /// is raised to one.
    pub fn with_timings(mut self, timings: FleetTimings) -> Self {
        self.timings = FleetTimings {
            batch_size: timings.batch_size.max(1),
            max_consecutive_poll_errors: timings.max_consecutive_poll_errors.max(1),
            ..timings
        };
        self
    }

    pub fn api(&self) -> &P {
        &self.api
    }

    pub fn timings(&self) -> &FleetTimings {
        &self.timings
    }

    /// Provision every requirement in order.
    ///
    /// Requirements without an eligible zone are recorded as
    /// `NoEligibleZone` and do not affect the others.
    pub async fn start_instances(
        &self,
        requirements: &[InstanceRequirement],
    ) -> FleetResult<FleetReport> {
        info!(requirements = requirements.len(), "starting fleet build");
        let mut report = FleetReport::default();

        for requirement in requirements {
            match self.provision(requirement).await {
                Ok(req_report) => report.requirements.push(req_report),
                Err(e) if e.is_expected() => {
                    warn!(
                        instance_type = %requirement.instance_type,
                        bid_price = requirement.max_bid_price,
                        "requirement aborted: {e}"
                    );
                    report.requirements.push(RequirementReport {
                        instance_type: requirement.instance_type.clone(),
                        desired_count: requirement.desired_count,
                        max_bid_price: requirement.max_bid_price,
                        outcome: RequirementOutcome::NoEligibleZone,
                        batches: Vec::new(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            running = report.instance_ids().len(),
            aborted = report.aborted().count(),
            complete = report.is_complete(),
            "fleet build finished"
        );
        Ok(report)
    }

    /// Provision a single requirement.
    ///
    /// Returns `FleetError::NoEligibleZone` when no allowed zone is at or
    /// under the bid cap for the first batch. A later batch without an
    /// eligible zone ends the requirement as `Interrupted`.
    pub async fn provision(
        &self,
        requirement: &InstanceRequirement,
    ) -> FleetResult<RequirementReport> {
        let instance_type = &requirement.instance_type;
        let mut report = RequirementReport {
            instance_type: instance_type.clone(),
            desired_count: requirement.desired_count,
            max_bid_price: requirement.max_bid_price,
            outcome: RequirementOutcome::Provisioned,
            batches: Vec::new(),
        };

        if requirement.desired_count == 0 {
            info!(%instance_type, "no instances requested");
            report.outcome = RequirementOutcome::Skipped;
            return Ok(report);
        }

        let oracle = PriceOracle::new(&self.api, self.launch.network(), &self.product_description);
        let batcher = FleetRequestBatcher::new(&self.api, &self.timings);
        let poller = FulfillmentPoller::new(&self.api, &self.timings);
        let tagger = Tagger::new(&self.api, &self.tags);

        let sizes = plan_batches(requirement.desired_count, self.timings.batch_size);
        info!(
            %instance_type,
            count = requirement.desired_count,
            batches = sizes.len(),
            "provisioning requirement"
        );

        let total_batches = sizes.len();
        for (index, size) in sizes.into_iter().enumerate() {
            let Some(zone) = oracle
                .select_zone(instance_type, requirement.max_bid_price)
                .await?
            else {
                if index == 0 {
                    return Err(FleetError::NoEligibleZone {
                        instance_type: instance_type.clone(),
                        max_bid_price: requirement.max_bid_price,
                    });
                }
                warn!(
                    %instance_type,
                    batch = index,
                    skipped_batches = total_batches - index,
                    "no eligible zone for remaining batches"
                );
                report.outcome = RequirementOutcome::Interrupted;
                break;
            };

            let spec = self.launch.build(instance_type, &zone.zone)?;
            let submitted = batcher
                .submit(index, &zone, &spec, size, requirement.max_bid_price)
                .await?;
            let outcome = poller.resolve(submitted).await;
            if outcome.termination != BatchTermination::Resolved {
                warn!(
                    %instance_type,
                    batch = index,
                    termination = ?outcome.termination,
                    "batch ended with unresolved requests marked failed"
                );
            }
            tagger.tag_batch(&outcome).await?;
            report.batches.push(outcome);
        }

        if !report.is_complete() {
            warn!(
                %instance_type,
                running = report.instance_ids().len(),
                cancelled = report.cancelled(),
                failed = report.failed(),
                "requirement partially provisioned"
            );
        }
        Ok(report)
    }
}
