// Domain modules
pub mod config;
pub mod error;
pub mod system;

pub use config::{
    BackendKind, GMachineConfig, SampleRange, SyntheticConfig, TelemetryConfig, TrainingConfig,
};
pub use error::{BackendError, GMachineError, ProbeError, ProbeInitError, Result};
pub use system::{
    HardwareCapability, SensorKind, SensorReading, SnapshotSource, TelemetrySnapshot,
    TrainingActivity,
};
