//! Triage configuration structure

use crate::utils::command::worker_available;
use crate::utils::error::{RefurbixError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main triage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageConfig {
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub plan: PlanConfig,
}

/// External worker binaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Imaging worker: compresses a partition into an image file
    #[serde(default = "default_imaging_worker")]
    pub imaging: String,
    /// Restore worker: decompresses an image file onto a partition
    #[serde(default = "default_restore_worker")]
    pub restore: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between task polls, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Defaults for partition planning
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Plan for EFI boot
    #[serde(default)]
    pub efi_boot: bool,
    /// ext4 tool version on the triage host (1.42 lacks metadata_csum)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext4_version: Option<String>,
}

fn default_imaging_worker() -> String {
    "image-volume".to_string()
}

fn default_restore_worker() -> String {
    "restore-volume".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            imaging: default_imaging_worker(),
            restore: default_restore_worker(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TriageConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Generate a sample configuration
    pub fn sample() -> Self {
        Self::default()
    }

    /// Validate field values
    pub fn validate(&self) -> Result<()> {
        if self.engine.poll_interval_ms == 0 {
            return Err(RefurbixError::Configuration(
                "engine.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.workers.imaging.is_empty() || self.workers.restore.is_empty() {
            return Err(RefurbixError::Configuration(
                "worker binaries must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Check that the configured worker binaries can actually be launched.
    /// Kept separate from `validate` so plans and dry-runs work on hosts
    /// without the workers installed.
    pub fn ensure_workers(&self) -> Result<()> {
        for worker in [&self.workers.imaging, &self.workers.restore] {
            if !worker_available(worker) {
                return Err(RefurbixError::Configuration(format!(
                    "worker binary not found: {}",
                    worker
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.engine.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TriageConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers.imaging, "image-volume");
        assert_eq!(config.engine.poll_interval_ms, 500);
        assert!(!config.plan.efi_boot);
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = TriageConfig::default();
        config.workers.imaging = "/opt/triage/image-volume".to_string();
        config.plan.ext4_version = Some("1.42".to_string());

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: TriageConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.workers.imaging, "/opt/triage/image-volume");
        assert_eq!(parsed.plan.ext4_version.as_deref(), Some("1.42"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: TriageConfig = toml::from_str("[plan]\nefi_boot = true\n").unwrap();
        assert!(parsed.plan.efi_boot);
        assert_eq!(parsed.workers.restore, "restore-volume");
        assert_eq!(parsed.engine.poll_interval_ms, 500);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut config = TriageConfig::default();
        config.engine.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
