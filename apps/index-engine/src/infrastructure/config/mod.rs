//! Configuration Module
//!
//! Environment-driven settings and the constituents file loader.

mod constituents;
mod settings;

pub use constituents::{ConstituentDefinition, load_constituents, parse_constituents};
pub use settings::{
    AdminToken, BroadcastSettings, ConfigError, EngineConfig, EngineTuning, IndexSettings,
    ScheduleSettings, ServerSettings, SimulationSettings,
};
