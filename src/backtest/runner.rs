//! Walk-forward back-test of the floor estimator.
//!
//! Replays a cohort's sales in chronological order. Each sale is predicted
//! from the sales strictly before it, as of its own timestamp, and the
//! prediction is scored against the price it actually fetched.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::debug;

use crate::strategy::{EstimatorParams, FloorEstimator, SaleFilter};
use crate::types::{DetectionError, DetectionResult, SaleObservation};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One scored prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestPoint {
    pub external_id: String,
    pub sold_at: DateTime<Utc>,
    pub actual: Decimal,
    pub predicted: Decimal,
    pub sample_size: usize,
    /// `predicted - actual`.
    pub error: Decimal,
}

impl BacktestPoint {
    pub fn abs_error(&self) -> Decimal {
        self.error.abs()
    }

    /// Absolute error as a percentage of the actual price.
    pub fn abs_pct_error(&self) -> Decimal {
        if self.actual.is_zero() {
            Decimal::ZERO
        } else {
            self.error.abs() / self.actual * dec!(100)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    pub evaluated: usize,
    /// Sales with too little history to predict.
    pub skipped: usize,
    pub mean_absolute_error: Option<Decimal>,
    pub mean_absolute_pct_error: Option<Decimal>,
    /// Mean of `predicted - actual`; negative means the floor runs low.
    pub mean_bias: Option<Decimal>,
    pub points: Vec<BacktestPoint>,
}

impl BacktestReport {
    fn from_points(points: Vec<BacktestPoint>, skipped: usize) -> Self {
        let n = Decimal::from(points.len());
        let mean = |f: &dyn Fn(&BacktestPoint) -> Decimal| -> Option<Decimal> {
            if points.is_empty() {
                None
            } else {
                Some(points.iter().map(f).sum::<Decimal>() / n)
            }
        };

        Self {
            evaluated: points.len(),
            skipped,
            mean_absolute_error: mean(&|p| p.abs_error()),
            mean_absolute_pct_error: mean(&|p| p.abs_pct_error()),
            mean_bias: mean(&|p| p.error),
            points,
        }
    }
}

// ---------------------------------------------------------------------------
// Back-tester
// ---------------------------------------------------------------------------

pub struct FloorBacktester {
    estimator: FloorEstimator,
}

impl FloorBacktester {
    pub fn new(params: EstimatorParams) -> DetectionResult<Self> {
        params.validate()?;
        Ok(Self {
            estimator: FloorEstimator::new(params),
        })
    }

    /// Walk `sales` (any order) forward in time.
    pub fn run(&self, sales: &[SaleObservation], filter: &SaleFilter) -> DetectionResult<BacktestReport> {
        let mut ordered: Vec<&SaleObservation> = sales.iter().filter(|s| filter.matches(s)).collect();
        ordered.sort_by(|a, b| a.sold_at.cmp(&b.sold_at));

        let mut points = Vec::new();
        let mut skipped = 0;

        for (i, target) in ordered.iter().enumerate() {
            // Strictly earlier: same-timestamp sales are not history.
            let history: Vec<SaleObservation> = ordered[..i]
                .iter()
                .filter(|s| s.sold_at < target.sold_at)
                .map(|s| (*s).clone())
                .collect();

            match self.estimator.estimate_at(&history, filter, target.sold_at) {
                Ok(floor) => points.push(BacktestPoint {
                    external_id: target.external_id.clone(),
                    sold_at: target.sold_at,
                    actual: target.price,
                    predicted: floor.value,
                    sample_size: floor.sample_size,
                    error: floor.value - target.price,
                }),
                Err(DetectionError::InsufficientData { .. }) => skipped += 1,
                Err(e) => return Err(e),
            }
        }

        let report = BacktestReport::from_points(points, skipped);
        debug!(
            evaluated = report.evaluated,
            skipped = report.skipped,
            mae = ?report.mean_absolute_error,
            "Back-test complete"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn series(prices: &[Decimal]) -> Vec<SaleObservation> {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| SaleObservation {
                external_id: format!("S{i}"),
                name: "Gengar Fossil".to_string(),
                price: *p,
                sold_at: start + Duration::days(i as i64),
                grade: None,
                language: "EN".to_string(),
            })
            .collect()
    }

    fn backtester(min_samples: usize) -> FloorBacktester {
        FloorBacktester::new(EstimatorParams::new(min_samples, 20)).unwrap()
    }

    #[test]
    fn test_flat_market_has_no_error() {
        let sales = series(&[dec!(100); 8]);
        let report = backtester(3).run(&sales, &SaleFilter::default()).unwrap();

        assert_eq!(report.skipped, 3);
        assert_eq!(report.evaluated, 5);
        assert_eq!(report.mean_absolute_error, Some(Decimal::ZERO));
        assert_eq!(report.mean_bias, Some(Decimal::ZERO));
    }

    #[test]
    fn test_rising_market_biases_low() {
        let prices: Vec<Decimal> = (0..8).map(|i| Decimal::from(100 + 10 * i)).collect();
        let report = backtester(3).run(&series(&prices), &SaleFilter::default()).unwrap();

        assert_eq!(report.evaluated, 5);
        assert!(report.mean_bias.unwrap() < Decimal::ZERO);
        assert!(report.mean_absolute_pct_error.unwrap() > Decimal::ZERO);
        assert!(report.points.iter().all(|p| p.predicted < p.actual));
    }

    #[test]
    fn test_too_little_history_skips_everything() {
        let sales = series(&[dec!(50), dec!(55)]);
        let report = backtester(5).run(&sales, &SaleFilter::default()).unwrap();

        assert_eq!(report.evaluated, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.mean_absolute_error, None);
    }

    #[test]
    fn test_same_timestamp_is_not_history() {
        let mut sales = series(&[dec!(100); 4]);
        let t = sales[0].sold_at;
        for s in &mut sales {
            s.sold_at = t;
        }
        let report = backtester(1).run(&sales, &SaleFilter::default()).unwrap();
        assert_eq!(report.evaluated, 0);
        assert_eq!(report.skipped, 4);
    }

    #[test]
    fn test_filter_restricts_cohort() {
        let mut sales = series(&[dec!(100); 6]);
        sales[5].language = "JP".to_string();
        let filter = SaleFilter {
            grade: None,
            language: Some("jp".to_string()),
        };
        let report = backtester(1).run(&sales, &filter).unwrap();
        assert_eq!(report.evaluated + report.skipped, 1);
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert!(FloorBacktester::new(EstimatorParams::new(5, 2)).is_err());
    }
}
