//! Per-cycle bookkeeping.
//!
//! Counts what happened to every listing a detection cycle touched, so one
//! summary line (and the API response) explains the cycle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// Summary of a complete fetch→estimate→evaluate→reconcile cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub listings_scanned: usize,
    /// Distinct item identities among the scanned listings.
    pub groups: usize,
    /// Listings skipped because their cohort had too few usable sales.
    pub insufficient_data: usize,
    /// Listings evaluated but not under the threshold.
    pub unprofitable: usize,
    pub created: usize,
    pub updated: usize,
    pub retired: usize,
    /// Listings skipped on a recoverable per-listing error.
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CycleReport {
    pub fn start(now: DateTime<Utc>) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            listings_scanned: 0,
            groups: 0,
            insufficient_data: 0,
            unprofitable: 0,
            created: 0,
            updated: 0,
            retired: 0,
            failed: 0,
            started_at: now,
            finished_at: None,
        }
    }

    /// Listings that ended up with an active opportunity this cycle.
    pub fn qualifying(&self) -> usize {
        self.created + self.updated
    }

    /// Every scanned listing lands in exactly one bucket.
    pub fn is_balanced(&self) -> bool {
        self.insufficient_data + self.unprofitable + self.created + self.updated + self.failed
            == self.listings_scanned
    }

    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.finished_at = Some(now);

        info!(
            cycle_id = %self.cycle_id,
            listings = self.listings_scanned,
            groups = self.groups,
            insufficient = self.insufficient_data,
            unprofitable = self.unprofitable,
            created = self.created,
            updated = self.updated,
            qualifying = self.qualifying(),
            retired = self.retired,
            failed = self.failed,
            elapsed_ms = (now - self.started_at).num_milliseconds(),
            "Detection cycle complete"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_report_is_empty() {
        let report = CycleReport::start(Utc::now());
        assert_eq!(report.qualifying(), 0);
        assert!(report.is_balanced());
        assert!(report.finished_at.is_none());
    }

    #[test]
    fn test_cycle_ids_are_unique() {
        let now = Utc::now();
        assert_ne!(CycleReport::start(now).cycle_id, CycleReport::start(now).cycle_id);
    }

    #[test]
    fn test_balance() {
        let mut report = CycleReport::start(Utc::now());
        report.listings_scanned = 5;
        report.insufficient_data = 1;
        report.unprofitable = 1;
        report.created = 2;
        report.updated = 1;
        report.retired = 3;
        assert!(report.is_balanced());
        assert_eq!(report.qualifying(), 3);

        report.failed = 1;
        assert!(!report.is_balanced());
    }

    #[test]
    fn test_finish_stamps_time() {
        let start = Utc::now();
        let mut report = CycleReport::start(start);
        report.finish(start + chrono::Duration::seconds(2));
        assert_eq!(report.finished_at, Some(start + chrono::Duration::seconds(2)));
    }
}
