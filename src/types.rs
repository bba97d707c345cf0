//! Shared types for the FLOORSCOUT engine.
//!
//! These types form the data model used across all modules: the
//! observations read from the store, the floor-price result, the persisted
//! opportunity record and the error taxonomy. Strategy, engine, storage
//! and ingest modules all depend on this file and nothing else in-crate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Item identity
// ---------------------------------------------------------------------------

/// Grouping key that partitions sales and listings into comparable cohorts.
///
/// Produced by the title normalizer; the core only compares it for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemIdentity {
    pub name: String,
    /// Upper-case language code ("EN", "JP", ...).
    pub language: String,
    /// Grading label such as "PSA 10". `None` means ungraded / any grade.
    pub grade: Option<String>,
}

impl ItemIdentity {
    pub fn new(name: impl Into<String>, language: impl Into<String>, grade: Option<String>) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
            grade,
        }
    }
}

impl fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.grade {
            Some(grade) => write!(f, "{} [{}] {}", self.name, self.language, grade),
            None => write!(f, "{} [{}]", self.name, self.language),
        }
    }
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// A completed marketplace sale. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleObservation {
    /// Marketplace item id; used to de-duplicate re-ingested sales.
    pub external_id: String,
    pub name: String,
    pub price: Decimal,
    pub sold_at: DateTime<Utc>,
    pub grade: Option<String>,
    pub language: String,
}

/// A live marketplace listing. Price and active flag change on refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingObservation {
    /// Marketplace item id; this is the listing reference opportunities point at.
    pub external_id: String,
    pub title: String,
    pub name: String,
    pub language: String,
    pub price: Decimal,
    pub shipping_cost: Decimal,
    pub grade: Option<String>,
    pub is_active: bool,
    pub url: Option<String>,
}

impl ListingObservation {
    /// The cohort this listing competes in. Grade is part of the identity so
    /// a graded listing is only ever priced against sales of the same grade.
    pub fn identity(&self) -> ItemIdentity {
        ItemIdentity::new(self.name.clone(), self.language.clone(), self.grade.clone())
    }

    /// Price plus buyer-paid shipping; `None` if the sum is unrepresentable.
    pub fn total_cost(&self) -> Option<Decimal> {
        self.price.checked_add(self.shipping_cost)
    }
}

impl fmt::Display for ListingObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ${:.2} + ${:.2} shipping{}",
            self.external_id,
            self.title,
            self.price,
            self.shipping_cost,
            if self.is_active { "" } else { " (ended)" },
        )
    }
}

// ---------------------------------------------------------------------------
// Floor price
// ---------------------------------------------------------------------------

/// A robust floor-price estimate for one cohort. Computed per cycle, never
/// persisted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorPrice {
    pub value: Decimal,
    /// Number of prices that survived filtering and outlier rejection.
    pub sample_size: usize,
}

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// A decision record asserting that a listing is priced profitably below
/// its cohort's floor.
///
/// Lifecycle: created active and unalerted, updated in place while the
/// listing stays active and profitable, flipped to `alerted` once delivered,
/// and (optionally) retired when the listing ends or the discount goes away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    /// Store-assigned id; `None` until persisted.
    pub id: Option<i64>,
    pub identity: ItemIdentity,
    pub listing_ref: String,
    pub listing_url: Option<String>,
    pub listing_total_cost: Decimal,
    pub floor_price: Decimal,
    pub sample_size: usize,
    pub discount_pct: Decimal,
    pub gross_profit: Decimal,
    pub marketplace_fees: Decimal,
    pub net_profit: Decimal,
    pub margin_pct: Decimal,
    pub is_active: bool,
    pub alerted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Opportunity {
    /// Overwrite the economics with a freshly evaluated projection.
    ///
    /// Identity, creation time and the `alerted` flag are left alone.
    pub fn refresh_from(&mut self, fresh: &Opportunity, now: DateTime<Utc>) {
        self.listing_url = fresh.listing_url.clone();
        self.listing_total_cost = fresh.listing_total_cost;
        self.floor_price = fresh.floor_price;
        self.sample_size = fresh.sample_size;
        self.discount_pct = fresh.discount_pct;
        self.gross_profit = fresh.gross_profit;
        self.marketplace_fees = fresh.marketplace_fees;
        self.net_profit = fresh.net_profit;
        self.margin_pct = fresh.margin_pct;
        self.updated_at = now;
    }

    /// Whether two records carry the same economics (ignores timestamps and flags).
    pub fn same_economics(&self, other: &Opportunity) -> bool {
        self.listing_total_cost == other.listing_total_cost
            && self.floor_price == other.floor_price
            && self.discount_pct == other.discount_pct
            && self.gross_profit == other.gross_profit
            && self.marketplace_fees == other.marketplace_fees
            && self.net_profit == other.net_profit
            && self.margin_pct == other.margin_pct
    }
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | listing {} ${:.2} vs floor ${:.2} ({:.1}% off) | net ${:.2} ({:.1}% margin)",
            self.identity,
            self.listing_ref,
            self.listing_total_cost,
            self.floor_price,
            self.discount_pct,
            self.net_profit,
            self.margin_pct,
        )
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("Insufficient data: {available} usable sales, need {required}")]
    InsufficientData { available: usize, required: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("An active opportunity already exists for listing {listing_ref}")]
    DuplicateActiveOpportunity { listing_ref: String },

    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    #[error("Arithmetic overflow evaluating listing {listing_ref}")]
    ArithmeticOverflow { listing_ref: String },
}

impl DetectionError {
    /// Recoverable errors skip a single listing; the rest abort the cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DetectionError::InsufficientData { .. }
                | DetectionError::InvalidObservation(_)
                | DetectionError::DuplicateActiveOpportunity { .. }
                | DetectionError::ArithmeticOverflow { .. }
        )
    }
}

impl From<sqlx::Error> for DetectionError {
    fn from(err: sqlx::Error) -> Self {
        DetectionError::StorageUnavailable(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for DetectionError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DetectionError::StorageUnavailable(format!("migration failed: {err}"))
    }
}

pub type DetectionResult<T> = std::result::Result<T, DetectionError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
