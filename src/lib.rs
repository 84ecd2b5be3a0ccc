//! Refurbix library - disk imaging/restore task engine and partition planning

pub mod config;
pub mod disk;
pub mod task;
pub mod utils;

pub use config::TriageConfig;
pub use utils::error::RefurbixError;
