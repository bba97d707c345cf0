//! Integration tests: full detection cycles against the in-memory and
//! SQLite stores, plus an end-to-end seed → detect → alert → back-test run.

mod detection_cycle;
mod fixtures;
mod simulation;
