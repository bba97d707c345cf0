//! Pricing strategy: floor estimation and opportunity evaluation.
//!
//! Both halves are pure and stateless: safe to call in parallel across
//! listings. Persistence and reconciliation live in `engine`.

pub mod evaluator;
pub mod floor;

pub use evaluator::{EvaluatorConfig, OpportunityEvaluator};
pub use floor::{estimate_floor, EstimatorParams, FloorEstimator, SaleFilter, SaleStatistics};
