//! ARBSCAN — cross-venue DEX arbitrage opportunity detector
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod alerts;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod storage;
pub mod strategy;
pub mod types;
pub mod venues;
