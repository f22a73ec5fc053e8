//! Hardware sensor discovery and reads
//!
//! A [`HardwareBackend`] enumerates a tree of [`HardwareUnit`]s once and then
//! refreshes individual units on demand. [`HardwareProbe`] sits on top of a
//! backend and turns unit sensors into telemetry snapshots.

mod nvml;
mod probe;
mod sysfs;

pub use nvml::NvmlBackend;
pub use probe::{HardwareProbe, ProbeState};
pub use sysfs::SysfsBackend;

use gmachine_core::{BackendError, BackendKind, SensorKind, SensorReading, TelemetryConfig};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

/// PCI vendor of a GPU unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Amd,
    Nvidia,
    Intel,
    Other(u16),
}

impl GpuVendor {
    pub fn from_pci_id(id: u16) -> Self {
        match id {
            0x1002 => GpuVendor::Amd,
            0x10de => GpuVendor::Nvidia,
            0x8086 => GpuVendor::Intel,
            other => GpuVendor::Other(other),
        }
    }
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuVendor::Amd => write!(f, "AMD"),
            GpuVendor::Nvidia => write!(f, "NVIDIA"),
            GpuVendor::Intel => write!(f, "Intel"),
            GpuVendor::Other(id) => write!(f, "PCI {:#06x}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Gpu(GpuVendor),
    Cpu,
    Memory,
    /// Sensor chip nested under another unit
    Hwmon,
}

/// How a backend locates a unit again on update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitHandle {
    Sysfs(PathBuf),
    HostCpu,
    HostMemory,
    /// NVML device index
    Nvml(u32),
    Named(String),
}

#[derive(Debug, Clone)]
pub struct HardwareUnit {
    pub kind: UnitKind,
    pub name: String,
    pub handle: UnitHandle,
    pub sensors: Vec<SensorReading>,
    pub sub_units: Vec<HardwareUnit>,
}

impl HardwareUnit {
    pub fn new(kind: UnitKind, name: impl Into<String>, handle: UnitHandle) -> Self {
        Self {
            kind,
            name: name.into(),
            handle,
            sensors: Vec::new(),
            sub_units: Vec::new(),
        }
    }

    pub fn with_sensor(mut self, sensor: SensorReading) -> Self {
        self.sensors.push(sensor);
        self
    }

    pub fn with_sub_unit(mut self, unit: HardwareUnit) -> Self {
        self.sub_units.push(unit);
        self
    }

    /// Depth-first walk over this unit's sensors and those of every sub-unit
    pub fn all_sensors(&self) -> Vec<&SensorReading> {
        let mut out: Vec<&SensorReading> = self.sensors.iter().collect();
        for unit in &self.sub_units {
            out.extend(unit.all_sensors());
        }
        out
    }

    /// First present value of the given kind whose name contains `pattern`
    /// (case-insensitive). An empty pattern matches any name.
    pub fn find_value(&self, kind: SensorKind, pattern: &str) -> Option<f64> {
        let pattern = pattern.to_lowercase();
        self.all_sensors()
            .into_iter()
            .filter(|s| s.kind == kind)
            .filter(|s| s.name.to_lowercase().contains(&pattern))
            .find_map(|s| s.value)
    }
}

/// Monitoring library seam.
pub trait HardwareBackend: Send {
    /// Discover all hardware units. Called once per probe.
    fn enumerate(&mut self) -> Result<Vec<HardwareUnit>, BackendError>;

    /// Refresh the sensors of `unit` itself, not its sub-units
    fn update(&mut self, unit: &mut HardwareUnit) -> Result<(), BackendError>;

    /// Drop the backend's handles. Must tolerate repeated calls.
    fn close(&mut self);
}

impl<B: HardwareBackend + ?Sized> HardwareBackend for Box<B> {
    fn enumerate(&mut self) -> Result<Vec<HardwareUnit>, BackendError> {
        (**self).enumerate()
    }

    fn update(&mut self, unit: &mut HardwareUnit) -> Result<(), BackendError> {
        (**self).update(unit)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Pick the backend named by `telemetry.backend`.
///
/// `Auto` prefers NVML when it initialises and reports at least one device.
pub fn backend_for(config: &TelemetryConfig) -> Box<dyn HardwareBackend> {
    match config.backend {
        BackendKind::Sysfs => Box::new(SysfsBackend::from_config(config)),
        BackendKind::Nvml => Box::new(NvmlBackend::init()),
        BackendKind::Auto => {
            let nvml = NvmlBackend::init();
            if nvml.has_devices() {
                info!("Using NVML backend");
                Box::new(nvml)
            } else {
                debug!("NVML has no devices, using sysfs backend");
                Box::new(SysfsBackend::from_config(config))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu_tree() -> HardwareUnit {
        HardwareUnit::new(UnitKind::Gpu(GpuVendor::Amd), "card0", UnitHandle::Named("card0".into()))
            .with_sensor(SensorReading::new("GPU Core", SensorKind::Load).with_value(50.0))
            .with_sub_unit(
                HardwareUnit::new(UnitKind::Hwmon, "hwmon0", UnitHandle::Named("hwmon0".into()))
                    .with_sensor(SensorReading::new("GPU Hot Spot", SensorKind::Temperature).with_value(90.0))
                    .with_sensor(SensorReading::new("GPU Core", SensorKind::Temperature).with_value(70.0)),
            )
    }

    #[test]
    fn test_explicit_sysfs_backend_reads_configured_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = TelemetryConfig {
            backend: BackendKind::Sysfs,
            sysfs_root: dir.path().to_path_buf(),
            host_units: false,
            ..TelemetryConfig::default()
        };

        let mut backend = backend_for(&config);
        assert!(backend.enumerate().unwrap().is_empty());
        backend.close();
        assert!(matches!(backend.enumerate(), Err(BackendError::Closed)));
    }

    #[test]
    fn test_vendor_from_pci_id() {
        assert_eq!(GpuVendor::from_pci_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_pci_id(0x10de), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_pci_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_pci_id(0x1234), GpuVendor::Other(0x1234));
        assert_eq!(GpuVendor::Other(0x1234).to_string(), "PCI 0x1234");
    }

    #[test]
    fn test_find_value_searches_sub_units_by_pattern() {
        let unit = gpu_tree();
        assert_eq!(unit.find_value(SensorKind::Temperature, "gpu core"), Some(70.0));
        assert_eq!(unit.find_value(SensorKind::Load, "GPU Core"), Some(50.0));
        assert_eq!(unit.find_value(SensorKind::MemoryUsed, ""), None);
        assert_eq!(unit.all_sensors().len(), 3);
    }
}
