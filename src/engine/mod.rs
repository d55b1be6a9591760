//! Core engine: quote synchronization, gas estimation and the polling round.

pub mod gas;
pub mod scanner;
pub mod synchronizer;

pub use gas::GasEstimator;
pub use scanner::{Scanner, ScannerConfig};
pub use synchronizer::{QuoteSynchronizer, SyncConfig};
