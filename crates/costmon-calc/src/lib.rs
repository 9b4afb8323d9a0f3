//! Ad-hoc cost calculations over the registered cost sources.
//!
//! A [`orchestrator::CalculationOrchestrator`] runs one sub-calculation per
//! requested [`CostCategory`] concurrently, bounded by its own semaphore and
//! a per-request deadline, and caches results by a digest of the request.
//! A failing category contributes zero and a warning; only a request where
//! every category fails is an error.
//!
//! [`CostCategory`]: costmon_common::types::CostCategory

pub mod error;
pub mod orchestrator;
pub mod request;


pub use error::{CalcError, Result};
pub use orchestrator::{CalculationConfig, CalculationOrchestrator, OrchestratorStats};
pub use request::{CalculationRequest, CalculationResult, CostComparison, CostSummary};
