//! Engine configuration

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::assign::HitThresholds;
use crate::engine::EngineSettings;
use crate::error::SynthError;
use crate::registry::DEFAULT_GROWTH;
use crate::spatial::DEFAULT_GRANULARITY;

/// Tunables of a synthesis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_seed")]
    pub random_seed: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_granularity")]
    pub patch_granularity: u32,
    #[serde(default = "default_growth")]
    pub registry_growth: f64,
    #[serde(default)]
    pub thresholds: HitThresholds,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Snapshots are skipped when unset
    #[serde(default)]
    pub output_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_name() -> String {
    "synthesis".to_string()
}

fn default_seed() -> u64 {
    42
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

fn default_granularity() -> u32 {
    DEFAULT_GRANULARITY
}

fn default_growth() -> f64 {
    DEFAULT_GROWTH
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            random_seed: default_seed(),
            workers: default_workers(),
            patch_granularity: default_granularity(),
            registry_growth: default_growth(),
            thresholds: HitThresholds::default(),
            snapshot: SnapshotConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SynthConfig {
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: SynthConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write {}", path.as_ref().display()))?;
        Ok(())
    }

    /// Single worker, small thresholds: a reproducible configuration for
    /// small fixtures.
    pub fn deterministic(seed: u64) -> Self {
        Self {
            name: "deterministic".to_string(),
            random_seed: seed,
            workers: 1,
            thresholds: HitThresholds {
                same_group: 30,
                distinct_staff: 300,
                staff_rebuild: 10_000,
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SynthError> {
        EngineSettings::from_config(self).validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SynthConfig::default();
        assert_eq!(config.patch_granularity, 15);
        assert_eq!(config.thresholds.same_group, 300);
        assert_eq!(config.thresholds.distinct_staff, 100_000);
        assert_eq!(config.logging.level, "info");
        assert!(config.workers >= 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: SynthConfig =
            serde_yaml::from_str("random_seed: 9\nworkers: 2\nthresholds:\n  same_group: 5\n")
                .unwrap();
        assert_eq!(config.random_seed, 9);
        assert_eq!(config.workers, 2);
        assert_eq!(config.thresholds.same_group, 5);
        assert_eq!(config.thresholds.staff_rebuild, 10_000_000);
        assert_eq!(config.snapshot.output_dir, None);
    }

    #[test]
    fn test_config_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = SynthConfig::deterministic(7);
        config.to_yaml(&path).unwrap();
        let loaded = SynthConfig::from_yaml(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = SynthConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());
        let mut config = SynthConfig::default();
        config.registry_growth = 1.0;
        assert!(config.validate().is_err());
    }
}
