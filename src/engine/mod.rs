//! Core engine: the fetch → estimate → evaluate → reconcile cycle.

pub mod detector;
pub mod report;

pub use detector::{run_detection_cycle, DetectionConfig, DetectionOutcome, Detector};
pub use report::CycleReport;
