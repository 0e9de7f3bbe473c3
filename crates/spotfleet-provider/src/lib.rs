//! spotfleet-provider — the compute provider boundary.
//!
//! The provisioning engine talks to the spot market only through the
//! [`ComputeApi`] trait. [`SimulatedProvider`] is an in-memory market
//! with scriptable request outcomes, used by the demo and by tests.
//!
//! # Components
//!
//! - **`api`** — `ComputeApi` trait, bid and status wire types
//! - **`error`** — `ProviderError`
//! - **`simulated`** — in-memory `ComputeApi` implementation

pub mod api;
pub mod error;
pub mod simulated;

pub use api::{BidRequest, ComputeApi, RequestStatus};
pub use error::{ProviderError, ProviderResult};
pub use simulated::{SimulatedFate, SimulatedProvider, TagCall};
