//! Ingestion boundary.
//!
//! Upstream acquisition (marketplace API, scraper, seed files) hands over
//! loosely-typed records. They are validated here, once, into the typed
//! observations the engine consumes; nothing past this module sees an
//! optional price or a missing id.

pub mod normalizer;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::storage::ObservationStore;
use crate::types::{DetectionError, DetectionResult, ListingObservation, SaleObservation};

pub use normalizer::{extract_grade, extract_language, normalize_card_name};

// ---------------------------------------------------------------------------
// Raw records
// ---------------------------------------------------------------------------

/// A completed sale as upstream reports it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSale {
    pub item_id: Option<String>,
    pub title: Option<String>,
    pub price: Option<Decimal>,
    pub sold_at: Option<DateTime<Utc>>,
    /// Explicit grade; extracted from the title when absent.
    #[serde(default)]
    pub grade: Option<String>,
    /// Explicit language code; detected from the title when absent.
    #[serde(default)]
    pub language: Option<String>,
}

/// A live listing as upstream reports it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawListing {
    pub item_id: Option<String>,
    pub title: Option<String>,
    pub price: Option<Decimal>,
    #[serde(default)]
    pub shipping_cost: Option<Decimal>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Defaults to active.
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Tagged upstream record: `{"kind": "sale", ...}` or `{"kind": "listing", ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawObservation {
    Sale(RawSale),
    Listing(RawListing),
}

/// A raw record after boundary validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Sale(SaleObservation),
    Listing(ListingObservation),
}

fn invalid(msg: impl Into<String>) -> DetectionError {
    DetectionError::InvalidObservation(msg.into())
}

fn required_id(item_id: Option<String>) -> DetectionResult<String> {
    item_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| invalid("missing item id"))
}

/// Title plus the canonical name derived from it.
fn required_title(id: &str, title: Option<String>) -> DetectionResult<(String, String)> {
    let title = title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| invalid(format!("{id}: empty title")))?;
    let name = normalize_card_name(&title);
    if name.is_empty() {
        return Err(invalid(format!("{id}: no card name left in title {title:?}")));
    }
    Ok((title, name))
}

fn positive_price(id: &str, price: Option<Decimal>) -> DetectionResult<Decimal> {
    match price {
        Some(p) if p > Decimal::ZERO => Ok(p),
        Some(p) => Err(invalid(format!("{id}: non-positive price {p}"))),
        None => Err(invalid(format!("{id}: missing price"))),
    }
}

fn language_for(explicit: Option<String>, title: &str) -> String {
    explicit
        .map(|l| l.trim().to_uppercase())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| extract_language(title))
}

fn grade_for(explicit: Option<String>, title: &str) -> Option<String> {
    explicit
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .or_else(|| extract_grade(title))
}

impl RawObservation {
    /// Convert into a typed observation, or `InvalidObservation`.
    pub fn validate(self) -> DetectionResult<Observation> {
        match self {
            RawObservation::Sale(raw) => {
                let external_id = required_id(raw.item_id)?;
                let (title, name) = required_title(&external_id, raw.title)?;
                let price = positive_price(&external_id, raw.price)?;
                let sold_at = raw
                    .sold_at
                    .ok_or_else(|| invalid(format!("{external_id}: missing sold_at")))?;

                Ok(Observation::Sale(SaleObservation {
                    grade: grade_for(raw.grade, &title),
                    language: language_for(raw.language, &title),
                    external_id,
                    name,
                    price,
                    sold_at,
                }))
            }
            RawObservation::Listing(raw) => {
                let external_id = required_id(raw.item_id)?;
                let (title, name) = required_title(&external_id, raw.title)?;
                let price = positive_price(&external_id, raw.price)?;
                let shipping_cost = raw.shipping_cost.unwrap_or(Decimal::ZERO);
                if shipping_cost < Decimal::ZERO {
                    return Err(invalid(format!(
                        "{external_id}: negative shipping cost {shipping_cost}"
                    )));
                }

                Ok(Observation::Listing(ListingObservation {
                    grade: grade_for(raw.grade, &title),
                    language: language_for(raw.language, &title),
                    external_id,
                    name,
                    title,
                    price,
                    shipping_cost,
                    is_active: raw.is_active.unwrap_or(true),
                    url: raw.url.filter(|u| !u.trim().is_empty()),
                }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Batch ingestion
// ---------------------------------------------------------------------------

/// Outcome counts of one `ingest_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub sales_added: usize,
    pub sales_duplicate: usize,
    pub listings_upserted: usize,
    /// Seed listings left alone because the store already knew them.
    pub listings_existing: usize,
    pub rejected: usize,
}

/// Validate and record a batch of raw observations.
///
/// Invalid records are logged and counted; a storage failure stops the
/// batch and propagates.
pub async fn ingest_batch(
    store: &dyn ObservationStore,
    records: Vec<RawObservation>,
) -> DetectionResult<IngestReport> {
    let mut report = IngestReport::default();

    for record in records {
        let observation = match record.validate() {
            Ok(obs) => obs,
            Err(e) => {
                warn!(error = %e, "Rejected observation");
                report.rejected += 1;
                continue;
            }
        };

        match observation {
            Observation::Sale(sale) => {
                let id = sale.external_id.clone();
                if store.record_sale(sale).await? {
                    report.sales_added += 1;
                } else {
                    debug!(external_id = %id, "Sale already recorded");
                    report.sales_duplicate += 1;
                }
            }
            Observation::Listing(listing) => {
                store.record_listing(listing).await?;
                report.listings_upserted += 1;
            }
        }
    }

    info!(
        sales_added = report.sales_added,
        sales_duplicate = report.sales_duplicate,
        listings = report.listings_upserted,
        rejected = report.rejected,
        "Ingested batch"
    );

    Ok(report)
}

/// Ingest seed records without disturbing live state.
///
/// Listings the store already holds are skipped, so a restart never
/// re-activates or re-prices a listing that changed since seeding. Sales
/// are deduplicated by `ingest_batch` as usual.
pub async fn ingest_seed(
    store: &dyn ObservationStore,
    records: Vec<RawObservation>,
) -> DetectionResult<IngestReport> {
    let mut fresh = Vec::with_capacity(records.len());
    let mut existing = 0;

    for record in records {
        if let RawObservation::Listing(raw) = &record {
            let id = raw.item_id.as_deref().map(str::trim).unwrap_or_default();
            if !id.is_empty() && store.find_listing(id).await?.is_some() {
                debug!(external_id = %id, "Seed listing already known");
                existing += 1;
                continue;
            }
        }
        fresh.push(record);
    }

    let mut report = ingest_batch(store, fresh).await?;
    report.listings_existing = existing;
    Ok(report)
}

/// Read a JSON array of raw observations.
pub fn load_seed_file(path: impl AsRef<Path>) -> Result<Vec<RawObservation>> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let records: Vec<RawObservation> = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse seed file {}", path.display()))?;

    info!(path = %path.display(), records = records.len(), "Seed file loaded");
    Ok(records)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
