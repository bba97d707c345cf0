//! Floor price estimation.
//!
//! Turns a window of completed sales into a single robust price: filter to
//! the cohort, keep the most recent sales, reject IQR outliers (with a
//! safety valve), then take a recency-weighted median.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{DetectionError, DetectionResult, FloorPrice, ItemIdentity, SaleObservation};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tukey fence multiplier applied to the interquartile range.
pub const DEFAULT_IQR_FENCE: Decimal = dec!(1.5);

/// Outlier rejection is abandoned if it would keep less than this share of
/// the sample.
pub const DEFAULT_MIN_RETAINED_FRACTION: Decimal = dec!(0.5);

/// Recency decay constant: weight = 1 / (1 + days / decay).
pub const DEFAULT_RECENCY_DECAY_DAYS: Decimal = dec!(10);

/// Lowest weight any sale can get, however old.
pub const DEFAULT_MIN_RECENCY_WEIGHT: Decimal = dec!(0.1);

/// Below this many prices the quartiles are too unstable to reject anything.
pub const MIN_PRICES_FOR_IQR: usize = 4;

/// Estimator parameters. Sample bounds are always caller-supplied; the
/// remaining knobs start at the named defaults above and may be overridden.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorParams {
    pub min_samples: usize,
    pub max_samples: usize,
    pub iqr_fence: Decimal,
    pub min_retained_fraction: Decimal,
    pub recency_decay_days: Decimal,
    pub min_recency_weight: Decimal,
}

impl EstimatorParams {
    pub fn new(min_samples: usize, max_samples: usize) -> Self {
        Self {
            min_samples,
            max_samples,
            iqr_fence: DEFAULT_IQR_FENCE,
            min_retained_fraction: DEFAULT_MIN_RETAINED_FRACTION,
            recency_decay_days: DEFAULT_RECENCY_DECAY_DAYS,
            min_recency_weight: DEFAULT_MIN_RECENCY_WEIGHT,
        }
    }

    pub fn validate(&self) -> DetectionResult<()> {
        if self.min_samples < 1 {
            return Err(DetectionError::InvalidConfiguration(
                "min_samples must be at least 1".into(),
            ));
        }
        if self.max_samples < self.min_samples {
            return Err(DetectionError::InvalidConfiguration(format!(
                "max_samples ({}) must be >= min_samples ({})",
                self.max_samples, self.min_samples
            )));
        }
        if self.iqr_fence < Decimal::ZERO {
            return Err(DetectionError::InvalidConfiguration(format!(
                "iqr_fence must be non-negative, got {}",
                self.iqr_fence
            )));
        }
        if self.min_retained_fraction <= Decimal::ZERO || self.min_retained_fraction > Decimal::ONE {
            return Err(DetectionError::InvalidConfiguration(format!(
                "min_retained_fraction must be in (0, 1], got {}",
                self.min_retained_fraction
            )));
        }
        if self.recency_decay_days <= Decimal::ZERO {
            return Err(DetectionError::InvalidConfiguration(format!(
                "recency_decay_days must be positive, got {}",
                self.recency_decay_days
            )));
        }
        if self.min_recency_weight <= Decimal::ZERO || self.min_recency_weight > Decimal::ONE {
            return Err(DetectionError::InvalidConfiguration(format!(
                "min_recency_weight must be in (0, 1], got {}",
                self.min_recency_weight
            )));
        }
        Ok(())
    }
}

/// Optional cohort filters. Grade matches exactly; language ignores case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaleFilter {
    pub grade: Option<String>,
    pub language: Option<String>,
}

impl SaleFilter {
    pub fn for_identity(identity: &ItemIdentity) -> Self {
        Self {
            grade: identity.grade.clone(),
            language: Some(identity.language.clone()),
        }
    }

    pub fn matches(&self, sale: &SaleObservation) -> bool {
        if let Some(grade) = &self.grade {
            if sale.grade.as_deref() != Some(grade.as_str()) {
                return false;
            }
        }
        if let Some(language) = &self.language {
            if !sale.language.eq_ignore_ascii_case(language) {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct PricePoint {
    price: Decimal,
    sold_at: DateTime<Utc>,
}

pub struct FloorEstimator {
    params: EstimatorParams,
}

impl FloorEstimator {
    pub fn new(params: EstimatorParams) -> Self {
        Self { params }
    }

    /// Estimate the floor price as of `now`.
    ///
    /// Returns `InsufficientData` when fewer than `min_samples` sales match
    /// the filter, or survive outlier rejection.
    pub fn estimate_at(
        &self,
        sales: &[SaleObservation],
        filter: &SaleFilter,
        now: DateTime<Utc>,
    ) -> DetectionResult<FloorPrice> {
        let mut matching: Vec<&SaleObservation> =
            sales.iter().filter(|s| filter.matches(s)).collect();

        if matching.len() < self.params.min_samples {
            debug!(
                available = matching.len(),
                required = self.params.min_samples,
                "Not enough sales for a floor price"
            );
            return Err(DetectionError::InsufficientData {
                available: matching.len(),
                required: self.params.min_samples,
            });
        }

        // Most recent first, then cap the window.
        matching.sort_by(|a, b| b.sold_at.cmp(&a.sold_at));
        matching.truncate(self.params.max_samples);

        let points: Vec<PricePoint> = matching
            .iter()
            .map(|s| PricePoint { price: s.price, sold_at: s.sold_at })
            .collect();

        let kept = self.reject_outliers(points);
        if kept.len() < self.params.min_samples {
            debug!(
                available = kept.len(),
                required = self.params.min_samples,
                "Not enough sales left after outlier rejection"
            );
            return Err(DetectionError::InsufficientData {
                available: kept.len(),
                required: self.params.min_samples,
            });
        }

        let value = self.weighted_median(&kept, now);
        debug!(floor = %value, sample_size = kept.len(), "Floor price estimated");

        Ok(FloorPrice {
            value,
            sample_size: kept.len(),
        })
    }

    /// Drop prices outside `[Q1 - k·IQR, Q3 + k·IQR]`.
    ///
    /// Q1/Q3 are the medians of the lower and upper halves of the sorted
    /// prices (the upper half takes the middle element for odd sizes).
    fn reject_outliers(&self, points: Vec<PricePoint>) -> Vec<PricePoint> {
        if points.len() < MIN_PRICES_FOR_IQR {
            return points;
        }

        let mut sorted: Vec<Decimal> = points.iter().map(|p| p.price).collect();
        sorted.sort();
        let mid = sorted.len() / 2;
        let q1 = median(&sorted[..mid]);
        let q3 = median(&sorted[mid..]);
        let iqr = q3 - q1;
        let lower = q1 - self.params.iqr_fence * iqr;
        let upper = q3 + self.params.iqr_fence * iqr;

        let kept: Vec<PricePoint> = points
            .iter()
            .filter(|p| p.price >= lower && p.price <= upper)
            .copied()
            .collect();

        let floor = Decimal::from(points.len()) * self.params.min_retained_fraction;
        if Decimal::from(kept.len()) < floor {
            warn!(
                total = points.len(),
                kept = kept.len(),
                "Outlier rejection would discard too much of the sample, using all prices"
            );
            return points;
        }

        if kept.len() < points.len() {
            debug!(
                rejected = points.len() - kept.len(),
                lower = %lower,
                upper = %upper,
                "Outliers rejected"
            );
        }
        kept
    }

    /// Weight for a sale `days_ago` whole days old.
    pub fn recency_weight(&self, days_ago: i64) -> Decimal {
        let days = Decimal::from(days_ago.max(0));
        let weight = Decimal::ONE / (Decimal::ONE + days / self.params.recency_decay_days);
        weight.max(self.params.min_recency_weight)
    }

    /// Price at which normalised cumulative recency weight first reaches 0.5.
    fn weighted_median(&self, points: &[PricePoint], now: DateTime<Utc>) -> Decimal {
        let mut weighted: Vec<(Decimal, Decimal)> = points
            .iter()
            .map(|p| (p.price, self.recency_weight((now - p.sold_at).num_days())))
            .collect();

        let total: Decimal = weighted.iter().map(|(_, w)| *w).sum();
        if total <= Decimal::ZERO {
            return unweighted_median(points);
        }

        // Stable: equal prices keep their recency order.
        weighted.sort_by(|a, b| a.0.cmp(&b.0));

        let half = dec!(0.5);
        let mut cumulative = Decimal::ZERO;
        for (price, weight) in &weighted {
            cumulative += *weight / total;
            if cumulative >= half {
                return *price;
            }
        }

        unweighted_median(points)
    }
}

/// Estimate a floor price with default tuning, as of now.
///
/// Standalone entry point for dashboards and back-testing.
pub fn estimate_floor(
    sales: &[SaleObservation],
    filter: &SaleFilter,
    min_samples: usize,
    max_samples: usize,
) -> DetectionResult<FloorPrice> {
    let params = EstimatorParams::new(min_samples, max_samples);
    params.validate()?;
    FloorEstimator::new(params).estimate_at(sales, filter, Utc::now())
}

fn unweighted_median(points: &[PricePoint]) -> Decimal {
    let mut prices: Vec<Decimal> = points.iter().map(|p| p.price).collect();
    prices.sort();
    median(&prices)
}

/// Median of an already-sorted slice. Zero for an empty slice.
fn median(sorted: &[Decimal]) -> Decimal {
    let n = sorted.len();
    if n == 0 {
        return Decimal::ZERO;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / dec!(2)
    }
}

// ---------------------------------------------------------------------------
// Summary statistics
// ---------------------------------------------------------------------------

/// Descriptive statistics over raw sale prices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleStatistics {
    pub count: usize,
    pub min: Decimal,
    pub max: Decimal,
    pub mean: Decimal,
    pub median: Decimal,
    /// Sample standard deviation; zero for fewer than two sales.
    pub stdev: Decimal,
}

impl SaleStatistics {
    pub fn from_sales(sales: &[SaleObservation]) -> Option<Self> {
        if sales.is_empty() {
            return None;
        }

        let mut prices: Vec<Decimal> = sales.iter().map(|s| s.price).collect();
        prices.sort();

        let count = prices.len();
        let n = Decimal::from(count);
        let mean = prices.iter().copied().sum::<Decimal>() / n;

        let stdev = if count > 1 {
            let sum_sq: Decimal = prices.iter().map(|p| (*p - mean) * (*p - mean)).sum();
            let variance = (sum_sq / (n - Decimal::ONE)).to_f64().unwrap_or(0.0);
            Decimal::from_f64(variance.sqrt()).unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        Some(Self {
            count,
            min: prices[0],
            max: prices[count - 1],
            mean,
            median: median(&prices),
            stdev,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
