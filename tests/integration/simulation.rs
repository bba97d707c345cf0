//! End-to-end run over the bundled seed data.
//!
//! Seed file, ingestion, detection, alert dispatch and back-test, on a
//! SQLite store configured from `config.toml`.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use std::sync::Arc;
use tower::ServiceExt;

use floorscout::api::{build_router, ApiState};
use floorscout::backtest::FloorBacktester;
use floorscout::config::AppConfig;
use floorscout::engine::Detector;
use floorscout::ingest::{ingest_batch, ingest_seed, load_seed_file};
use floorscout::notify::{AlertDispatcher, ConsoleSink};
use floorscout::storage::{ObservationStore, SqliteStore};
use floorscout::strategy::SaleFilter;
use floorscout::types::ItemIdentity;

async fn seeded_store() -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let records = load_seed_file("data/seed.json").unwrap();
    let report = ingest_batch(&*store, records).await.unwrap();

    assert_eq!(report.sales_added, 8);
    assert_eq!(report.listings_upserted, 4);
    assert_eq!(report.rejected, 0);
    store
}

#[tokio::test]
async fn test_seeded_pipeline() {
    let config = AppConfig::load("config.toml").unwrap();
    let detection = config.detection_config().unwrap();
    let store = seeded_store().await;

    let detector = Detector::new(store.clone(), detection).unwrap();
    let outcome = detector.run_cycle().await.unwrap();

    // Only the cheap Charizard clears the threshold; the Pikachu cohort and
    // the unnamed lot have too few sales.
    assert_eq!(outcome.report.listings_scanned, 4);
    assert_eq!(outcome.created.len(), 1);
    assert_eq!(outcome.created[0].listing_ref, "L-9001");
    assert_eq!(outcome.created[0].identity.grade.as_deref(), Some("PSA 9"));
    assert_eq!(outcome.created[0].sample_size, 5, "the 5200 lot is rejected");
    assert_eq!(outcome.report.unprofitable, 1);
    assert_eq!(outcome.report.insufficient_data, 2);

    let dispatcher = AlertDispatcher::new().with_sink(Box::new(ConsoleSink::new()));
    let sent = dispatcher.dispatch(&*store, &outcome.created).await.unwrap();
    assert_eq!(sent.delivered, 1);
    let stored = store.find_active_opportunity("L-9001").await.unwrap().unwrap();
    assert!(stored.alerted);

    // A restart re-seeds: nothing is added, the withdrawn listing stays
    // withdrawn, and the next cycle only updates.
    let mut sold = store.find_listing("L-9002").await.unwrap().unwrap();
    sold.is_active = false;
    store.record_listing(sold).await.unwrap();

    let again = ingest_seed(&*store, load_seed_file("data/seed.json").unwrap())
        .await
        .unwrap();
    assert_eq!(again.sales_added, 0);
    assert_eq!(again.sales_duplicate, 8);
    assert_eq!(again.listings_upserted, 0);
    assert_eq!(again.listings_existing, 4);
    assert!(!store.find_listing("L-9002").await.unwrap().unwrap().is_active);

    let outcome = detector.run_cycle().await.unwrap();
    assert!(outcome.created.is_empty());
    assert_eq!(outcome.report.updated, 1);
    assert_eq!(outcome.report.listings_scanned, 3);
    let stored = store.find_active_opportunity("L-9001").await.unwrap().unwrap();
    assert!(stored.alerted, "refresh keeps the alerted flag");
}

#[tokio::test]
async fn test_seeded_backtest() {
    let config = AppConfig::load("config.toml").unwrap();
    let detection = config.detection_config().unwrap();
    let store = seeded_store().await;

    let identity = ItemIdentity::new("Charizard Base Set", "EN", Some("PSA 9".into()));
    let sales = store.fetch_sales(&identity).await.unwrap();
    assert_eq!(sales.len(), 6);

    let report = FloorBacktester::new(detection.estimator)
        .unwrap()
        .run(&sales, &SaleFilter::for_identity(&identity))
        .unwrap();
    assert_eq!(report.evaluated + report.skipped, 6);
    assert_eq!(report.evaluated, 1);
    // The last sale is the 5200 outlier; the floor from history sits far below it.
    assert!(report.mean_bias.unwrap().is_sign_negative());
}

#[tokio::test]
async fn test_seeded_api() {
    let config = AppConfig::load("config.toml").unwrap();
    let store = seeded_store().await;
    let detector = Arc::new(Detector::new(store, config.detection_config().unwrap()).unwrap());
    let state = Arc::new(ApiState::new(detector, AlertDispatcher::new()));

    let resp = build_router(state.clone())
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/detect")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = build_router(state)
        .oneshot(
            Request::builder()
                .uri("/api/floor?name=Pikachu%20Illustrator%20Promo&language=JP")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
