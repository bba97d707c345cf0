//! Detection cycles end to end, run identically against both stores.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use floorscout::engine::{run_detection_cycle, Detector};
use floorscout::storage::{ObservationStore, SqliteStore};
use floorscout::types::DetectionError;

use crate::fixtures::*;

#[tokio::test]
async fn test_reference_scenario() {
    let listings = vec![listing("L-1", dec!(60), Decimal::ZERO, None)];
    for (kind, store) in both_stores(reference_sales(), listings).await {
        let detector = Detector::new(store.clone(), reference_config()).unwrap();
        let outcome = detector.run_cycle_at(now()).await.unwrap();

        assert_eq!(outcome.created.len(), 1, "{kind}");
        let opp = &outcome.created[0];
        assert!(opp.id.is_some(), "{kind}");
        assert_eq!(opp.floor_price, dec!(100), "{kind}");
        assert_eq!(opp.sample_size, 5, "{kind}");
        assert_eq!(opp.listing_total_cost, dec!(60), "{kind}");
        assert_eq!(opp.gross_profit, dec!(40), "{kind}");
        assert_eq!(opp.marketplace_fees, dec!(13), "{kind}");
        assert_eq!(opp.net_profit, dec!(22), "{kind}");
        assert_eq!(opp.discount_pct, dec!(40), "{kind}");
        assert_eq!(opp.margin_pct.round_dp(2), dec!(36.67), "{kind}");

        // What the store hands back matches what the cycle returned.
        let stored = store.find_active_opportunity("L-1").await.unwrap().unwrap();
        assert!(stored.same_economics(opp), "{kind}");
        assert!(!stored.alerted, "{kind}");
    }
}

#[tokio::test]
async fn test_detection_is_idempotent() {
    let listings = vec![
        listing("L-1", dec!(60), Decimal::ZERO, None),
        listing("L-2", dec!(70), dec!(4.5), None),
        listing("L-3", dec!(95), Decimal::ZERO, None),
    ];
    for (kind, store) in both_stores(reference_sales(), listings).await {
        let detector = Detector::new(store.clone(), reference_config()).unwrap();

        let first = detector.run_cycle_at(now()).await.unwrap();
        let second = detector.run_cycle_at(now()).await.unwrap();

        assert_eq!(first.created.len(), 2, "{kind}");
        assert!(second.created.is_empty(), "{kind}");
        assert_eq!(second.report.updated, 2, "{kind}");
        assert_eq!(second.report.unprofitable, 1, "{kind}");

        let active = store.active_opportunities().await.unwrap();
        assert_eq!(active.len(), 2, "{kind}");
        for opp in &first.created {
            let now_stored = active.iter().find(|o| o.listing_ref == opp.listing_ref).unwrap();
            assert!(now_stored.same_economics(opp), "{kind}");
            assert_eq!(now_stored.id, opp.id, "{kind}");
        }
    }
}

#[tokio::test]
async fn test_price_rise_does_not_touch_existing_opportunity() {
    let listings = vec![listing("L-1", dec!(60), Decimal::ZERO, None)];
    for (kind, store) in both_stores(reference_sales(), listings).await {
        let detector = Detector::new(store.clone(), reference_config()).unwrap();
        detector.run_cycle_at(now()).await.unwrap();

        store
            .record_listing(listing("L-1", dec!(85), Decimal::ZERO, None))
            .await
            .unwrap();
        let outcome = detector.run_cycle_at(now()).await.unwrap();
        assert!(outcome.created.is_empty(), "{kind}");
        assert_eq!(outcome.report.unprofitable, 1, "{kind}");

        let stored = store.find_active_opportunity("L-1").await.unwrap().unwrap();
        assert!(stored.is_active, "{kind}");
        assert_eq!(stored.listing_total_cost, dec!(60), "{kind}");
        assert_eq!(stored.net_profit, dec!(22), "{kind}");
    }
}

#[tokio::test]
async fn test_retirement_sweep() {
    let listings = vec![
        listing("L-1", dec!(60), Decimal::ZERO, None),
        listing("L-2", dec!(55), Decimal::ZERO, None),
    ];
    for (kind, store) in both_stores(reference_sales(), listings).await {
        let mut config = reference_config();
        config.retire_stale_opportunities = true;
        let detector = Detector::new(store.clone(), config).unwrap();
        detector.run_cycle_at(now()).await.unwrap();

        // L-1 sold, L-2 repriced above the threshold.
        let mut sold = listing("L-1", dec!(60), Decimal::ZERO, None);
        sold.is_active = false;
        store.record_listing(sold).await.unwrap();
        store
            .record_listing(listing("L-2", dec!(85), Decimal::ZERO, None))
            .await
            .unwrap();

        let outcome = detector.run_cycle_at(now()).await.unwrap();
        assert_eq!(outcome.report.retired, 2, "{kind}");
        assert!(store.active_opportunities().await.unwrap().is_empty(), "{kind}");

        // A retired row does not block a new active one for the same listing.
        store
            .record_listing(listing("L-2", dec!(50), Decimal::ZERO, None))
            .await
            .unwrap();
        let outcome = detector.run_cycle_at(now()).await.unwrap();
        assert_eq!(outcome.created.len(), 1, "{kind}");
        assert_eq!(outcome.created[0].listing_ref, "L-2", "{kind}");
    }
}

#[tokio::test]
async fn test_outliers_do_not_move_the_floor() {
    let sales = vec![
        sale("S-1", dec!(100), 0, None),
        sale("S-2", dec!(102), 0, None),
        sale("S-3", dec!(98), 0, None),
        sale("S-4", dec!(101), 0, None),
        sale("S-5", dec!(99), 0, None),
        sale("S-6", dec!(5000), 0, None),
    ];
    let listings = vec![listing("L-1", dec!(70), Decimal::ZERO, None)];
    for (kind, store) in both_stores(sales, listings).await {
        let detector = Detector::new(store.clone(), reference_config()).unwrap();
        let outcome = detector.run_cycle_at(now()).await.unwrap();

        assert_eq!(outcome.created.len(), 1, "{kind}");
        assert_eq!(outcome.created[0].floor_price, dec!(100), "{kind}");
        assert_eq!(outcome.created[0].sample_size, 5, "{kind}");
    }
}

#[tokio::test]
async fn test_grade_specific_floor() {
    let mut sales = reference_sales();
    for (i, p) in [dec!(400), dec!(420), dec!(380), dec!(410), dec!(390)].into_iter().enumerate() {
        sales.push(sale(&format!("G-{i}"), p, i as i64, Some("PSA 10")));
    }
    let listings = vec![
        listing("L-raw", dec!(60), Decimal::ZERO, None),
        listing("L-psa", dec!(250), Decimal::ZERO, Some("PSA 10")),
    ];
    for (kind, store) in both_stores(sales, listings).await {
        let detector = Detector::new(store.clone(), reference_config()).unwrap();
        let outcome = detector.run_cycle_at(now()).await.unwrap();

        assert_eq!(outcome.report.groups, 2, "{kind}");
        let graded = outcome
            .created
            .iter()
            .find(|o| o.listing_ref == "L-psa")
            .unwrap();
        assert_eq!(graded.identity.grade.as_deref(), Some("PSA 10"), "{kind}");
        assert!(graded.floor_price >= dec!(380), "{kind}");
        assert_eq!(graded.sample_size, 5, "{kind}");
    }
}

#[tokio::test]
async fn test_insufficient_data_skips_without_error() {
    let sales = reference_sales().into_iter().take(4).collect();
    let listings = vec![listing("L-1", dec!(10), Decimal::ZERO, None)];
    for (kind, store) in both_stores(sales, listings).await {
        let detector = Detector::new(store.clone(), reference_config()).unwrap();
        let outcome = detector.run_cycle_at(now()).await.unwrap();
        assert!(outcome.created.is_empty(), "{kind}");
        assert_eq!(outcome.report.insufficient_data, 1, "{kind}");
        assert!(outcome.report.is_balanced(), "{kind}");
    }
}

#[tokio::test]
async fn test_concurrent_cycles_never_duplicate() {
    let listings = vec![
        listing("L-1", dec!(60), Decimal::ZERO, None),
        listing("L-2", dec!(65), Decimal::ZERO, None),
    ];
    for (kind, store) in both_stores(reference_sales(), listings).await {
        // Shared detector: the run lock serialises the cycles.
        let detector = Arc::new(Detector::new(store.clone(), reference_config()).unwrap());
        let (a, b) = tokio::join!(detector.run_cycle_at(now()), detector.run_cycle_at(now()));
        let created = a.unwrap().created.len() + b.unwrap().created.len();
        assert_eq!(created, 2, "{kind}");

        // Independent detectors on the same store: the store's uniqueness
        // rule catches whatever the interleaving lets through.
        let other = Detector::new(store.clone(), reference_config()).unwrap();
        let third = Detector::new(store.clone(), reference_config()).unwrap();
        let (c, d) = tokio::join!(other.run_cycle_at(now()), third.run_cycle_at(now()));
        assert!(c.unwrap().created.is_empty(), "{kind}");
        assert!(d.unwrap().created.is_empty(), "{kind}");

        assert_eq!(store.active_opportunities().await.unwrap().len(), 2, "{kind}");
    }
}

#[tokio::test]
async fn test_fresh_store_race_yields_one_active_per_listing() {
    let listings = vec![listing("L-1", dec!(60), Decimal::ZERO, None)];
    for (kind, store) in both_stores(reference_sales(), listings).await {
        let a = Detector::new(store.clone(), reference_config()).unwrap();
        let b = Detector::new(store.clone(), reference_config()).unwrap();
        let (ra, rb) = tokio::join!(a.run_cycle_at(now()), b.run_cycle_at(now()));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(ra.created.len() + rb.created.len(), 1, "{kind}");
        assert_eq!(store.active_opportunities().await.unwrap().len(), 1, "{kind}");
    }
}

#[tokio::test]
async fn test_sqlite_rejects_duplicate_active_insert() {
    let store = SqliteStore::in_memory().await.unwrap();
    fill(&store, reference_sales(), vec![listing("L-1", dec!(60), Decimal::ZERO, None)]).await;
    let detector = Detector::new(Arc::new(store), reference_config()).unwrap();
    let created = detector.run_cycle_at(now()).await.unwrap().created;

    let mut clone = created[0].clone();
    clone.id = None;
    let err = detector.store().upsert_opportunity(clone).await.unwrap_err();
    assert!(matches!(err, DetectionError::DuplicateActiveOpportunity { .. }));
}

#[tokio::test]
async fn test_run_detection_cycle_returns_only_new() {
    let listings = vec![listing("L-1", dec!(60), Decimal::ZERO, None)];
    for (kind, store) in both_stores(reference_sales(), listings).await {
        let created = run_detection_cycle(store.clone(), &reference_config()).await.unwrap();
        assert_eq!(created.len(), 1, "{kind}");

        store
            .record_listing(listing("L-2", dec!(50), Decimal::ZERO, None))
            .await
            .unwrap();
        let created = run_detection_cycle(store.clone(), &reference_config()).await.unwrap();
        assert_eq!(created.len(), 1, "{kind}");
        assert_eq!(created[0].listing_ref, "L-2", "{kind}");
    }
}

#[tokio::test]
async fn test_invalid_configuration_is_fatal() {
    for (kind, store) in both_stores(reference_sales(), vec![]).await {
        let mut config = reference_config();
        config.estimator.min_samples = 0;
        let err = run_detection_cycle(store, &config).await.unwrap_err();
        assert!(matches!(err, DetectionError::InvalidConfiguration(_)), "{kind}");
    }
}
