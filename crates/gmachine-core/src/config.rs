use crate::error::{GMachineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GMachineConfig {
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub synthetic: SyntheticConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

impl GMachineConfig {
    /// Default config file location: `<config_dir>/gmachine/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("gmachine").join("config.toml"))
    }

    /// Load from an explicit path, or the default location when it exists,
    /// or fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.telemetry.interval_ms == 0 {
            return Err(GMachineError::Config(
                "telemetry.interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.telemetry.max_consecutive_failures == Some(0) {
            return Err(GMachineError::Config(
                "telemetry.max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if self.synthetic.vram_total_gb <= 0.0 {
            return Err(GMachineError::Config(
                "synthetic.vram_total_gb must be positive".to_string(),
            ));
        }

        self.synthetic.load_pct.validate("synthetic.load_pct")?;
        self.synthetic.vram_used_gb.validate("synthetic.vram_used_gb")?;
        self.synthetic.temperature_c.validate("synthetic.temperature_c")?;

        if self.training.epochs == 0 {
            return Err(GMachineError::Config(
                "training.epochs must be greater than zero".to_string(),
            ));
        }
        if self.training.checkpoint_every == 0 {
            return Err(GMachineError::Config(
                "training.checkpoint_every must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Sampling period
    pub interval_ms: u64,
    /// Substring identifying the GPU core load/temperature sensors
    pub gpu_core_pattern: String,
    /// Root of the sysfs tree, `/` outside of tests
    pub sysfs_root: PathBuf,
    /// Which hardware backend to probe
    pub backend: BackendKind,
    /// Include host CPU and memory units when probing through sysfs
    pub host_units: bool,
    /// Demote to synthetic after this many read failures in a row
    pub max_consecutive_failures: Option<u32>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            gpu_core_pattern: "GPU Core".to_string(),
            sysfs_root: PathBuf::from("/"),
            backend: BackendKind::Auto,
            host_units: true,
            max_consecutive_failures: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// NVML when it initialises with at least one device, sysfs otherwise
    #[default]
    Auto,
    Sysfs,
    Nvml,
}

/// Inclusive range for a randomized value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRange {
    pub min: f64,
    pub max: f64,
}

impl SampleRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn validate(&self, field: &str) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(GMachineError::Config(format!(
                "{} must satisfy min <= max (got {}..{})",
                field, self.min, self.max
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub vram_total_gb: f64,
    pub load_pct: SampleRange,
    pub vram_used_gb: SampleRange,
    pub temperature_c: SampleRange,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            vram_total_gb: 12.0,
            load_pct: SampleRange::new(45.0, 75.0),
            vram_used_gb: SampleRange::new(6.5, 8.5),
            temperature_c: SampleRange::new(65.0, 80.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: u32,
    pub epoch_delay_ms: u64,
    pub checkpoint_every: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            epoch_delay_ms: 2000,
            checkpoint_every: 10,
            batch_size: 32,
            learning_rate: 0.001,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = GMachineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.telemetry.interval_ms, 1000);
        assert_eq!(config.synthetic.vram_total_gb, 12.0);
        assert_eq!(config.telemetry.max_consecutive_failures, None);
        assert_eq!(config.telemetry.backend, BackendKind::Auto);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = GMachineConfig::from_toml(
            r#"
            [telemetry]
            interval_ms = 250
            backend = "nvml"

            [synthetic]
            vram_total_gb = 24.0
            "#,
        )
        .unwrap();

        assert_eq!(config.telemetry.interval_ms, 250);
        assert_eq!(config.telemetry.backend, BackendKind::Nvml);
        assert_eq!(config.telemetry.gpu_core_pattern, "GPU Core");
        assert_eq!(config.synthetic.vram_total_gb, 24.0);
        assert_eq!(config.synthetic.load_pct, SampleRange::new(45.0, 75.0));
        assert_eq!(config.training.epochs, 100);
    }

    #[test]
    fn test_inverted_range_rejected() {
        let config = GMachineConfig::from_toml(
            r#"
            [synthetic]
            temperature_c = { min = 90.0, max = 60.0 }
            "#,
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("synthetic.temperature_c"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = GMachineConfig::default();
        config.telemetry.interval_ms = 0;
        assert!(matches!(config.validate(), Err(GMachineError::Config(_))));
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[training]\nepochs = 5\nepoch_delay_ms = 10").unwrap();

        let config = GMachineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.training.epochs, 5);
        assert_eq!(config.training.epoch_delay_ms, 10);
        assert_eq!(config.training.checkpoint_every, 10);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = GMachineConfig::load(Some(&dir.path().join("missing.toml")));
        assert!(matches!(result, Err(GMachineError::Io(_))));
    }

    #[test]
    fn test_malformed_toml_is_toml_error() {
        let result = GMachineConfig::from_toml("[telemetry\ninterval_ms = ");
        assert!(matches!(result, Err(GMachineError::Toml(_))));
    }
}
