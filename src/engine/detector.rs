//! Detection orchestrator.
//!
//! One cycle: pull active listings, group them by item identity, fetch each
//! cohort's sales concurrently, estimate one floor per cohort, evaluate
//! every listing against it and reconcile the result with the persisted
//! opportunities (create, update in place, or leave alone).
//!
//! Reconciliation is lookup-before-insert under a per-detector run lock,
//! so overlapping `run_cycle` calls never both decide "not found, insert".
//! Stores additionally reject a second active opportunity per listing.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::engine::report::CycleReport;
use crate::storage::ObservationStore;
use crate::strategy::{EstimatorParams, EvaluatorConfig, FloorEstimator, OpportunityEvaluator, SaleFilter};
use crate::types::{
    DetectionError, DetectionResult, ItemIdentity, ListingObservation, Opportunity, SaleObservation,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Concurrent sale fetches per cycle when not configured.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    pub estimator: EstimatorParams,
    pub evaluator: EvaluatorConfig,
    /// Upper bound on in-flight `fetch_sales` calls. Size it to the store's
    /// connection pool.
    pub fetch_concurrency: usize,
    /// Flip active opportunities to inactive when their listing disappears
    /// or stops clearing the threshold.
    pub retire_stale_opportunities: bool,
}

impl DetectionConfig {
    pub fn new(estimator: EstimatorParams, evaluator: EvaluatorConfig) -> Self {
        Self {
            estimator,
            evaluator,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            retire_stale_opportunities: false,
        }
    }

    pub fn validate(&self) -> DetectionResult<()> {
        self.estimator.validate()?;
        self.evaluator.validate()?;
        if self.fetch_concurrency == 0 {
            return Err(DetectionError::InvalidConfiguration(
                "fetch_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Result of one cycle: the newly created opportunities (for the
/// notification sinks) and the bookkeeping.
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub created: Vec<Opportunity>,
    pub report: CycleReport,
}

enum Reconciled {
    Created(Opportunity),
    Updated,
}

pub struct Detector {
    store: Arc<dyn ObservationStore>,
    config: DetectionConfig,
    estimator: FloorEstimator,
    evaluator: OpportunityEvaluator,
    run_lock: Mutex<()>,
}

impl Detector {
    /// Build a detector. Fails with `InvalidConfiguration` before any
    /// storage access if the configuration is out of range.
    pub fn new(store: Arc<dyn ObservationStore>, config: DetectionConfig) -> DetectionResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            estimator: FloorEstimator::new(config.estimator.clone()),
            evaluator: OpportunityEvaluator::new(config.evaluator.clone()),
            config,
            run_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ObservationStore> {
        &self.store
    }

    pub fn estimator(&self) -> &FloorEstimator {
        &self.estimator
    }

    pub async fn run_cycle(&self) -> DetectionResult<DetectionOutcome> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle with sale ages measured against `now`.
    ///
    /// Per-listing failures are logged and skipped. `StorageUnavailable`
    /// aborts the cycle; writes already made stand.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> DetectionResult<DetectionOutcome> {
        let _guard = self.run_lock.lock().await;
        let mut report = CycleReport::start(now);

        match self.detect(now, &mut report).await {
            Ok(created) => {
                report.finish(Utc::now());
                Ok(DetectionOutcome { created, report })
            }
            Err(e) => {
                error!(cycle_id = %report.cycle_id, error = %e, "Detection cycle aborted");
                Err(e)
            }
        }
    }

    async fn detect(
        &self,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> DetectionResult<Vec<Opportunity>> {
        let listings = self.store.fetch_active_listings().await?;
        report.listings_scanned = listings.len();

        let active_refs: HashSet<String> =
            listings.iter().map(|l| l.external_id.clone()).collect();
        let groups = group_by_identity(listings);
        report.groups = groups.len();

        info!(
            cycle_id = %report.cycle_id,
            listings = report.listings_scanned,
            groups = report.groups,
            "Starting detection cycle"
        );

        let sales = self.fetch_all_sales(&groups).await;

        let mut created = Vec::new();
        let mut no_longer_qualifying: HashSet<String> = HashSet::new();

        for ((identity, group), fetched) in groups.iter().zip(sales) {
            let sales = match fetched {
                Ok(sales) => sales,
                Err(e) if e.is_recoverable() => {
                    warn!(identity = %identity, error = %e, "Sale lookup failed, skipping cohort");
                    report.failed += group.len();
                    continue;
                }
                Err(e) => return Err(e),
            };

            let floor = match self.estimator.estimate_at(&sales, &SaleFilter::for_identity(identity), now) {
                Ok(floor) => floor,
                Err(DetectionError::InsufficientData { available, required }) => {
                    debug!(
                        identity = %identity,
                        available,
                        required,
                        listings = group.len(),
                        "Insufficient sales, skipping cohort"
                    );
                    report.insufficient_data += group.len();
                    continue;
                }
                Err(e) if e.is_recoverable() => {
                    warn!(identity = %identity, error = %e, "Floor estimation failed, skipping cohort");
                    report.failed += group.len();
                    continue;
                }
                Err(e) => return Err(e),
            };

            for listing in group {
                let fresh = match self.evaluator.evaluate(listing, &floor, now) {
                    Ok(Some(fresh)) => fresh,
                    Ok(None) => {
                        report.unprofitable += 1;
                        no_longer_qualifying.insert(listing.external_id.clone());
                        continue;
                    }
                    Err(e) => {
                        warn!(listing_ref = %listing.external_id, error = %e, "Evaluation failed, skipping listing");
                        report.failed += 1;
                        continue;
                    }
                };

                match self.reconcile(fresh, now).await {
                    Ok(Reconciled::Created(opp)) => {
                        info!(
                            listing_ref = %opp.listing_ref,
                            identity = %opp.identity,
                            floor = %opp.floor_price,
                            net = %format!("${:.2}", opp.net_profit),
                            margin = %format!("{:.1}%", opp.margin_pct),
                            "New opportunity"
                        );
                        report.created += 1;
                        created.push(opp);
                    }
                    Ok(Reconciled::Updated) => report.updated += 1,
                    Err(e) if e.is_recoverable() => {
                        warn!(listing_ref = %listing.external_id, error = %e, "Reconciliation failed, skipping listing");
                        report.failed += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if self.config.retire_stale_opportunities {
            report.retired = self.retire_stale(&active_refs, &no_longer_qualifying, now).await?;
        }

        Ok(created)
    }

    /// Sales per group, in group order, with at most `fetch_concurrency`
    /// lookups in flight.
    async fn fetch_all_sales(
        &self,
        groups: &[(ItemIdentity, Vec<ListingObservation>)],
    ) -> Vec<DetectionResult<Vec<SaleObservation>>> {
        let lookups: Vec<(usize, ItemIdentity)> = groups
            .iter()
            .enumerate()
            .map(|(i, (identity, _))| (i, identity.clone()))
            .collect();

        let mut fetched: Vec<(usize, DetectionResult<Vec<SaleObservation>>)> = stream::iter(lookups)
            .map(|(i, identity)| {
                let store = Arc::clone(&self.store);
                async move { (i, store.fetch_sales(&identity).await) }
            })
            .buffer_unordered(self.config.fetch_concurrency)
            .collect()
            .await;
        fetched.sort_by_key(|(i, _)| *i);
        fetched.into_iter().map(|(_, result)| result).collect()
    }

    /// Update the listing's active opportunity in place, or insert a new one.
    async fn reconcile(&self, fresh: Opportunity, now: DateTime<Utc>) -> DetectionResult<Reconciled> {
        match self.store.find_active_opportunity(&fresh.listing_ref).await? {
            Some(mut existing) => {
                let changed = !existing.same_economics(&fresh);
                existing.refresh_from(&fresh, now);
                self.store.upsert_opportunity(existing).await?;
                debug!(listing_ref = %fresh.listing_ref, changed, "Opportunity refreshed");
                Ok(Reconciled::Updated)
            }
            None => {
                let saved = self.store.upsert_opportunity(fresh).await?;
                Ok(Reconciled::Created(saved))
            }
        }
    }

    /// Retire active opportunities whose listing is gone or was evaluated
    /// this cycle without clearing the threshold. Returns how many.
    async fn retire_stale(
        &self,
        active_refs: &HashSet<String>,
        no_longer_qualifying: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> DetectionResult<usize> {
        let mut retired = 0;
        for opp in self.store.active_opportunities().await? {
            let listing_gone = !active_refs.contains(&opp.listing_ref);
            if !listing_gone && !no_longer_qualifying.contains(&opp.listing_ref) {
                continue;
            }
            let Some(id) = opp.id else { continue };
            self.store.retire_opportunity(id, now).await?;
            info!(listing_ref = %opp.listing_ref, listing_gone, "Opportunity retired");
            retired += 1;
        }
        Ok(retired)
    }
}

/// Group listings by identity, keeping first-seen order.
fn group_by_identity(
    listings: Vec<ListingObservation>,
) -> Vec<(ItemIdentity, Vec<ListingObservation>)> {
    let mut index: HashMap<ItemIdentity, usize> = HashMap::new();
    let mut groups: Vec<(ItemIdentity, Vec<ListingObservation>)> = Vec::new();
    for listing in listings {
        let identity = listing.identity();
        match index.get(&identity) {
            Some(&i) => groups[i].1.push(listing),
            None => {
                index.insert(identity.clone(), groups.len());
                groups.push((identity, vec![listing]));
            }
        }
    }
    groups
}

/// Run one detection cycle and return the newly created opportunities.
///
/// Updates to existing opportunities are persisted but not returned.
pub async fn run_detection_cycle(
    store: Arc<dyn ObservationStore>,
    config: &DetectionConfig,
) -> DetectionResult<Vec<Opportunity>> {
    let detector = Detector::new(store, config.clone())?;
    Ok(detector.run_cycle().await?.created)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
