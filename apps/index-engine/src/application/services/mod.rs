//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `IndexEngine`: Single-writer tick, end-of-day, backfill and
//!   recalibration pipeline

mod engine;

pub use engine::{
    BackfillReport, EngineError, EngineSettings, EngineStatus, IndexEngine, RecalibrationReport,
};

#[cfg(test)]
mod tests;
