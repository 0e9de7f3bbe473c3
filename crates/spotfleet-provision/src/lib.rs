//! spotfleet-provision — spot fleet provisioning engine.
//!
//! Turns an ordered list of instance requirements into tagged, running
//! spot instances. Work is strictly sequential: one requirement at a
//! time, one batch at a time, with the batch's poll loop owning its
//! slot array.
//!
//! # Architecture
//!
//! ```text
//! FleetController
//!   └── per requirement
//!       ├── PriceOracle        cheapest allowed zone under the bid cap
//!       ├── LaunchSpecBuilder  image, subnet, disk layout table
//!       └── per batch (≤ batch_size)
//!           ├── FleetRequestBatcher  one bid, one slot per instance
//!           ├── FulfillmentPoller    poll to terminal, error budget
//!           └── Tagger               tag running instances only
//! ```

pub mod batcher;
pub mod controller;
pub mod error;
pub mod launch;
pub mod poller;
pub mod pricing;
pub mod report;
pub mod tagger;

pub use batcher::{FleetRequestBatcher, SubmittedBatch, plan_batches};
pub use controller::FleetController;
pub use error::{FleetError, FleetResult};
pub use launch::{DiskLayoutTable, LaunchSpecBuilder};
pub use poller::{BatchOutcome, BatchTermination, ErrorBudget, FulfillmentPoller, classify};
pub use pricing::{PriceOracle, ZoneChoice, cheapest_allowed};
pub use report::{FleetReport, RequirementOutcome, RequirementReport};
pub use tagger::Tagger;
