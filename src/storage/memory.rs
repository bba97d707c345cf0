//! In-memory `ObservationStore`.
//!
//! Deterministic and dependency-free; enforces the same one-active-
//! opportunity-per-listing rule as the SQLite store. `set_unavailable`
//! simulates an outage for error-path testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{newest_sales, sale_in_cohort, sort_by_margin, ObservationStore};
use crate::types::{
    DetectionError, DetectionResult, ItemIdentity, ListingObservation, Opportunity, SaleObservation,
};

#[derive(Default)]
struct Inner {
    sales: BTreeMap<String, SaleObservation>,
    listings: BTreeMap<String, ListingObservation>,
    opportunities: BTreeMap<i64, Opportunity>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StorageUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> DetectionResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DetectionError::StorageUnavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn fetch_active_listings(&self) -> DetectionResult<Vec<ListingObservation>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner.listings.values().filter(|l| l.is_active).cloned().collect())
    }

    async fn list_listings(&self, active_only: bool, limit: usize) -> DetectionResult<Vec<ListingObservation>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .listings
            .values()
            .filter(|l| l.is_active || !active_only)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_listing(&self, external_id: &str) -> DetectionResult<Option<ListingObservation>> {
        self.check()?;
        Ok(self.inner.read().await.listings.get(external_id).cloned())
    }

    async fn recent_sales(&self, limit: usize) -> DetectionResult<Vec<SaleObservation>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(newest_sales(inner.sales.values().cloned().collect(), limit))
    }

    async fn fetch_sales(&self, identity: &ItemIdentity) -> DetectionResult<Vec<SaleObservation>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .sales
            .values()
            .filter(|s| sale_in_cohort(s, identity))
            .cloned()
            .collect())
    }

    async fn find_active_opportunity(&self, listing_ref: &str) -> DetectionResult<Option<Opportunity>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .opportunities
            .values()
            .find(|o| o.is_active && o.listing_ref == listing_ref)
            .cloned())
    }

    async fn upsert_opportunity(&self, mut opportunity: Opportunity) -> DetectionResult<Opportunity> {
        self.check()?;
        let mut inner = self.inner.write().await;

        let clashes = inner.opportunities.values().any(|o| {
            o.is_active && o.listing_ref == opportunity.listing_ref && o.id != opportunity.id
        });
        if opportunity.is_active && clashes {
            return Err(DetectionError::DuplicateActiveOpportunity {
                listing_ref: opportunity.listing_ref,
            });
        }

        let id = match opportunity.id {
            Some(id) if inner.opportunities.contains_key(&id) => id,
            Some(id) => {
                return Err(DetectionError::StorageUnavailable(format!(
                    "opportunity {id} does not exist"
                )))
            }
            None => {
                inner.next_id += 1;
                inner.next_id
            }
        };
        opportunity.id = Some(id);
        inner.opportunities.insert(id, opportunity.clone());
        Ok(opportunity)
    }

    async fn opportunities(&self, active_only: bool) -> DetectionResult<Vec<Opportunity>> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut found: Vec<Opportunity> = inner
            .opportunities
            .values()
            .filter(|o| o.is_active || !active_only)
            .cloned()
            .collect();
        sort_by_margin(&mut found);
        Ok(found)
    }

    async fn retire_opportunity(&self, id: i64, at: DateTime<Utc>) -> DetectionResult<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        if let Some(opp) = inner.opportunities.get_mut(&id) {
            opp.is_active = false;
            opp.updated_at = at;
        }
        Ok(())
    }

    async fn mark_alerted(&self, id: i64) -> DetectionResult<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        if let Some(opp) = inner.opportunities.get_mut(&id) {
            opp.alerted = true;
        }
        Ok(())
    }

    async fn record_sale(&self, sale: SaleObservation) -> DetectionResult<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        if inner.sales.contains_key(&sale.external_id) {
            return Ok(false);
        }
        inner.sales.insert(sale.external_id.clone(), sale);
        Ok(true)
    }

    async fn record_listing(&self, listing: ListingObservation) -> DetectionResult<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        match inner.listings.get_mut(&listing.external_id) {
            Some(existing) => {
                existing.price = listing.price;
                existing.shipping_cost = listing.shipping_cost;
                existing.is_active = listing.is_active;
            }
            None => {
                inner.listings.insert(listing.external_id.clone(), listing);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
