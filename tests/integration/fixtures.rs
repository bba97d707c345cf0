//! Deterministic builders shared by the integration tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use floorscout::engine::DetectionConfig;
use floorscout::storage::{MemoryStore, ObservationStore, SqliteStore};
use floorscout::strategy::{EstimatorParams, EvaluatorConfig};
use floorscout::types::{ListingObservation, SaleObservation};

pub const CHARIZARD: &str = "Charizard Base Set";

/// Fixed "now" for every scenario.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
}

pub fn sale(id: &str, price: Decimal, days_ago: i64, grade: Option<&str>) -> SaleObservation {
    SaleObservation {
        external_id: id.to_string(),
        name: CHARIZARD.to_string(),
        price,
        sold_at: now() - Duration::days(days_ago) - Duration::minutes(30),
        grade: grade.map(String::from),
        language: "EN".to_string(),
    }
}

/// Five same-day ungraded sales: [100, 100, 105, 95, 98].
pub fn reference_sales() -> Vec<SaleObservation> {
    [dec!(100), dec!(100), dec!(105), dec!(95), dec!(98)]
        .into_iter()
        .enumerate()
        .map(|(i, p)| sale(&format!("S-{i}"), p, 0, None))
        .collect()
}

pub fn listing(id: &str, price: Decimal, shipping: Decimal, grade: Option<&str>) -> ListingObservation {
    ListingObservation {
        external_id: id.to_string(),
        title: format!("{CHARIZARD} {}", grade.unwrap_or("")).trim().to_string(),
        name: CHARIZARD.to_string(),
        language: "EN".to_string(),
        price,
        shipping_cost: shipping,
        grade: grade.map(String::from),
        is_active: true,
        url: Some(format!("https://www.ebay.com/itm/{id}")),
    }
}

/// min_samples 5, max_samples 10, threshold 0.8, fees 13%, resale shipping 5.
pub fn reference_config() -> DetectionConfig {
    DetectionConfig::new(
        EstimatorParams::new(5, 10),
        EvaluatorConfig {
            threshold: dec!(0.8),
            fee_rate: dec!(0.13),
            resale_shipping_cost: dec!(5),
        },
    )
}

pub async fn fill(
    store: &dyn ObservationStore,
    sales: Vec<SaleObservation>,
    listings: Vec<ListingObservation>,
) {
    for s in sales {
        store.record_sale(s).await.unwrap();
    }
    for l in listings {
        store.record_listing(l).await.unwrap();
    }
}

/// One of each store, both filled with the same data.
pub async fn both_stores(
    sales: Vec<SaleObservation>,
    listings: Vec<ListingObservation>,
) -> Vec<(&'static str, Arc<dyn ObservationStore>)> {
    let memory: Arc<dyn ObservationStore> = Arc::new(MemoryStore::new());
    let sqlite: Arc<dyn ObservationStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
    fill(memory.as_ref(), sales.clone(), listings.clone()).await;
    fill(sqlite.as_ref(), sales, listings).await;
    vec![("memory", memory), ("sqlite", sqlite)]
}
