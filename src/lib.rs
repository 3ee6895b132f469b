pub mod assign;
pub mod config;
pub mod engine;
pub mod error;
pub mod field;
pub mod geo;
pub mod groups;
pub mod kernel;
pub mod population;
pub mod registry;
pub mod rng;
pub mod scenario;
pub mod snapshot;
pub mod spatial;
pub mod stats;
pub mod venue;

pub use config::SynthConfig;
pub use engine::{Engine, EngineBuilder, EngineSettings, EpochReport, RunEvent, RunSummary};
pub use error::SynthError;
pub use scenario::{Scenario, ScenarioLoader};
