//! Strategy layer: AMM swap math, the trade simulator and the cross-venue
//! opportunity evaluator. Everything here is pure and synchronous.

pub mod evaluator;
pub mod simulator;
pub mod v2_math;
pub mod v3_math;

pub use evaluator::{
    rank, Evaluation, EvaluationStatus, EvaluatorConfig, OpportunityEvaluator, SkippedPair,
};
pub use simulator::{round_trip, simulate, spot_price};
