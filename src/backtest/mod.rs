//! Back-testing of the floor estimator against historical sales.

pub mod runner;

pub use runner::{BacktestPoint, BacktestReport, FloorBacktester};
