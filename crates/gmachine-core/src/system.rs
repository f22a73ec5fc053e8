//! System-level types for hardware monitoring

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether a real sensor backend is usable on this machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareCapability {
    #[default]
    Unavailable,
    Available,
}

impl HardwareCapability {
    pub fn is_available(self) -> bool {
        self == HardwareCapability::Available
    }
}

/// Sensor category. Values are normalised to the unit noted on each variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Percent
    Load,
    /// Gigabytes
    MemoryUsed,
    /// Gigabytes
    MemoryTotal,
    /// Degrees Celsius
    Temperature,
}

impl SensorKind {
    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Load => "%",
            SensorKind::MemoryUsed | SensorKind::MemoryTotal => "GB",
            SensorKind::Temperature => "°C",
        }
    }
}

/// A named sensor value. `value` is `None` when the sensor is not present this tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub name: String,
    pub kind: SensorKind,
    pub value: Option<f64>,
}

impl SensorReading {
    pub fn new(name: impl Into<String>, kind: SensorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            value: None,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    Real,
    Synthetic,
}

impl SnapshotSource {
    pub fn label(&self) -> &'static str {
        match self {
            SnapshotSource::Real => "real",
            SnapshotSource::Synthetic => "synthetic",
        }
    }
}

/// One complete set of GPU telemetry values for a single tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub gpu_load_pct: f64,
    pub vram_used_gb: f64,
    pub vram_total_gb: f64,
    pub gpu_temp_c: f64,
    pub source: SnapshotSource,
}

impl TelemetrySnapshot {
    /// Zeroed snapshot against the given VRAM capacity
    pub fn idle(vram_total_gb: f64, source: SnapshotSource) -> Self {
        Self {
            gpu_load_pct: 0.0,
            vram_used_gb: 0.0,
            vram_total_gb,
            gpu_temp_c: 0.0,
            source,
        }
    }
}

/// Shared "training is running" flag.
///
/// Written by the training loop, read by the telemetry sampler on every tick.
#[derive(Debug, Clone, Default)]
pub struct TrainingActivity(Arc<AtomicBool>);

impl TrainingActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.0.store(active, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_activity_is_shared_between_clones() {
        let activity = TrainingActivity::new();
        let reader = activity.clone();
        assert!(!reader.is_active());

        activity.set_active(true);
        assert!(reader.is_active());

        activity.set_active(false);
        assert!(!reader.is_active());
    }

    #[test]
    fn test_snapshot_serializes_source_lowercase() {
        let snapshot = TelemetrySnapshot::idle(12.0, SnapshotSource::Synthetic);
        let encoded = toml::to_string(&snapshot).unwrap();
        assert!(encoded.contains("source = \"synthetic\""));
    }
}
