pub mod hardware;
mod scheduler;
mod sink;
mod source;
mod synthetic;
mod training;

pub use hardware::{
    backend_for, GpuVendor, HardwareBackend, HardwareProbe, HardwareUnit, NvmlBackend, ProbeState,
    SysfsBackend, UnitHandle, UnitKind,
};
pub use scheduler::{SchedulerHandle, TelemetryScheduler, TickStats};
pub use sink::{DisplayMetrics, DisplaySurface, MetricsSink};
pub use source::TelemetrySource;
pub use synthetic::{SyntheticSampler, SyntheticSource};
pub use training::{checkpoint_file, epoch_metrics, TrainingEvent, TrainingSimulator};

// Re-export core types so callers only depend on services
pub use gmachine_core::{
    BackendError, BackendKind, GMachineConfig, GMachineError, HardwareCapability, ProbeError, SensorKind,
    SensorReading, SnapshotSource, TelemetrySnapshot, TrainingActivity,
};
