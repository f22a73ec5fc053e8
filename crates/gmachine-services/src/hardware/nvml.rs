//! NVIDIA backend over NVML

use gmachine_core::{BackendError, SensorKind, SensorReading};
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::{Device, Nvml};
use tracing::{debug, warn};

use super::{GpuVendor, HardwareBackend, HardwareUnit, UnitHandle, UnitKind};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One device's raw NVML values, each independently optional
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct NvmlReadings {
    load_pct: Option<f64>,
    used_gb: Option<f64>,
    total_gb: Option<f64>,
    temperature_c: Option<f64>,
}

impl NvmlReadings {
    fn new(utilization: Option<u32>, memory: Option<(u64, u64)>, temperature: Option<u32>) -> Self {
        Self {
            load_pct: utilization.map(f64::from),
            used_gb: memory.map(|(used, _)| used as f64 / BYTES_PER_GB),
            total_gb: memory.map(|(_, total)| total as f64 / BYTES_PER_GB),
            temperature_c: temperature.map(f64::from),
        }
    }

    fn read(device: &Device<'_>) -> Self {
        Self::new(
            device.utilization_rates().map(|u| u.gpu).ok(),
            device.memory_info().map(|m| (m.used, m.total)).ok(),
            device.temperature(TemperatureSensor::Gpu).ok(),
        )
    }

    fn value_for(&self, kind: SensorKind) -> Option<f64> {
        match kind {
            SensorKind::Load => self.load_pct,
            SensorKind::MemoryUsed => self.used_gb,
            SensorKind::MemoryTotal => self.total_gb,
            SensorKind::Temperature => self.temperature_c,
        }
    }
}

pub struct NvmlBackend {
    nvml: Option<Nvml>,
    init_error: Option<String>,
    closed: bool,
}

impl NvmlBackend {
    /// Load the NVML library. A failure is kept and reported by `enumerate`.
    pub fn init() -> Self {
        Self::from_init(Nvml::init())
    }

    fn from_init(result: Result<Nvml, NvmlError>) -> Self {
        match result {
            Ok(nvml) => Self {
                nvml: Some(nvml),
                init_error: None,
                closed: false,
            },
            Err(e) => {
                debug!("NVML initialisation failed: {}", e);
                Self {
                    nvml: None,
                    init_error: Some(e.to_string()),
                    closed: false,
                }
            }
        }
    }

    pub fn has_devices(&self) -> bool {
        self.nvml
            .as_ref()
            .and_then(|nvml| nvml.device_count().ok())
            .is_some_and(|count| count > 0)
    }

    fn nvml(&self) -> Result<&Nvml, BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }
        match (&self.nvml, &self.init_error) {
            (Some(nvml), _) => Ok(nvml),
            (None, Some(e)) => Err(BackendError::Driver(e.clone())),
            (None, None) => Err(BackendError::Closed),
        }
    }
}

fn driver_error(e: NvmlError) -> BackendError {
    BackendError::Driver(e.to_string())
}

fn gpu_unit(index: u32, name: &str) -> HardwareUnit {
    HardwareUnit::new(
        UnitKind::Gpu(GpuVendor::Nvidia),
        format!("nvml{} ({})", index, name),
        UnitHandle::Nvml(index),
    )
    .with_sensor(SensorReading::new("GPU Core", SensorKind::Load))
    .with_sensor(SensorReading::new("GPU Memory Used", SensorKind::MemoryUsed))
    .with_sensor(SensorReading::new("GPU Memory Total", SensorKind::MemoryTotal))
    .with_sensor(SensorReading::new("GPU Core", SensorKind::Temperature))
}

fn apply_readings(unit: &mut HardwareUnit, readings: &NvmlReadings) {
    for sensor in &mut unit.sensors {
        sensor.value = readings.value_for(sensor.kind);
    }
}

impl HardwareBackend for NvmlBackend {
    fn enumerate(&mut self) -> Result<Vec<HardwareUnit>, BackendError> {
        let nvml = self.nvml()?;
        let count = nvml.device_count().map_err(driver_error)?;

        let mut units = Vec::new();
        for index in 0..count {
            let device = match nvml.device_by_index(index) {
                Ok(device) => device,
                Err(e) => {
                    warn!(index, "Skipping NVML device: {}", e);
                    continue;
                }
            };
            let name = device
                .name()
                .unwrap_or_else(|_| format!("NVIDIA GPU {}", index));

            let mut unit = gpu_unit(index, &name);
            apply_readings(&mut unit, &NvmlReadings::read(&device));
            debug!(unit = %unit.name, "Discovered GPU");
            units.push(unit);
        }
        Ok(units)
    }

    fn update(&mut self, unit: &mut HardwareUnit) -> Result<(), BackendError> {
        let nvml = self.nvml()?;
        let index = match &unit.handle {
            UnitHandle::Nvml(index) => *index,
            _ => {
                return Err(BackendError::Update(format!("{} is not an NVML unit", unit.name)));
            }
        };

        let device = nvml.device_by_index(index).map_err(driver_error)?;
        apply_readings(unit, &NvmlReadings::read(&device));
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(nvml) = self.nvml.take() {
            if let Err(e) = nvml.shutdown() {
                warn!("NVML shutdown failed: {}", e);
            }
        }
    }
}
