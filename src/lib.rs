//! FLOORSCOUT: floor price estimation and arbitrage opportunity detection
//! for collectible cards.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod backtest;
pub mod config;
pub mod engine;
pub mod ingest;
pub mod notify;
pub mod storage;
pub mod strategy;
pub mod types;
