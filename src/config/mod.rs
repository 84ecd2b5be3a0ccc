//! Configuration

mod triage;

pub use triage::{EngineConfig, PlanConfig, TriageConfig, WorkerConfig};
