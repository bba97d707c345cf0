//! Persistence layer.
//!
//! Defines the `ObservationStore` trait the engine reads observations from
//! and reconciles opportunities into, plus two implementations:
//! - `MemoryStore`: in-process maps, used by tests and dry runs
//! - `SqliteStore`: sqlx-backed SQLite with a unique index guarding the
//!   one-active-opportunity-per-listing invariant

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{DetectionResult, ItemIdentity, ListingObservation, Opportunity, SaleObservation};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Abstraction over the transactional store holding sales, listings and
/// opportunities.
///
/// Any failure to reach the backing store surfaces as
/// `DetectionError::StorageUnavailable`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// All listings currently flagged active.
    async fn fetch_active_listings(&self) -> DetectionResult<Vec<ListingObservation>>;

    /// Up to `limit` listings in external id order, optionally only active ones.
    async fn list_listings(&self, active_only: bool, limit: usize) -> DetectionResult<Vec<ListingObservation>>;

    async fn find_listing(&self, external_id: &str) -> DetectionResult<Option<ListingObservation>>;

    /// The `limit` most recent sales across all cohorts, newest first.
    async fn recent_sales(&self, limit: usize) -> DetectionResult<Vec<SaleObservation>>;

    /// Sales for a cohort. Name matches exactly, language ignores case, and
    /// a graded identity restricts to that exact grade. An ungraded identity
    /// returns every grade.
    async fn fetch_sales(&self, identity: &ItemIdentity) -> DetectionResult<Vec<SaleObservation>>;

    /// The active opportunity for a listing, if one exists.
    async fn find_active_opportunity(&self, listing_ref: &str) -> DetectionResult<Option<Opportunity>>;

    /// Insert when `id` is `None`, otherwise overwrite the stored row.
    /// Inserting a second active opportunity for the same listing fails with
    /// `DuplicateActiveOpportunity`.
    async fn upsert_opportunity(&self, opportunity: Opportunity) -> DetectionResult<Opportunity>;

    /// Stored opportunities, highest margin first. Retired ones are
    /// included unless `active_only`.
    async fn opportunities(&self, active_only: bool) -> DetectionResult<Vec<Opportunity>>;

    /// Every active opportunity, highest margin first.
    async fn active_opportunities(&self) -> DetectionResult<Vec<Opportunity>> {
        self.opportunities(true).await
    }

    /// Flip an opportunity to inactive.
    async fn retire_opportunity(&self, id: i64, at: DateTime<Utc>) -> DetectionResult<()>;

    async fn mark_alerted(&self, id: i64) -> DetectionResult<()>;

    /// Record a completed sale. Returns `false` if the external id was
    /// already known.
    async fn record_sale(&self, sale: SaleObservation) -> DetectionResult<bool>;

    /// Insert a listing, or refresh price, shipping and active flag of an
    /// existing one with the same external id.
    async fn record_listing(&self, listing: ListingObservation) -> DetectionResult<()>;
}

/// Whether a sale belongs to the cohort described by `identity`.
pub(crate) fn sale_in_cohort(sale: &SaleObservation, identity: &ItemIdentity) -> bool {
    sale.name == identity.name
        && sale.language.eq_ignore_ascii_case(&identity.language)
        && match &identity.grade {
            Some(grade) => sale.grade.as_deref() == Some(grade.as_str()),
            None => true,
        }
}

/// Newest first, then truncated to `limit`.
pub(crate) fn newest_sales(mut sales: Vec<SaleObservation>, limit: usize) -> Vec<SaleObservation> {
    sales.sort_by(|a, b| b.sold_at.cmp(&a.sold_at));
    sales.truncate(limit);
    sales
}

/// Highest margin first; ties broken by id for a stable order.
pub(crate) fn sort_by_margin(opportunities: &mut [Opportunity]) {
    opportunities.sort_by(|a, b| b.margin_pct.cmp(&a.margin_pct).then(a.id.cmp(&b.id)));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
