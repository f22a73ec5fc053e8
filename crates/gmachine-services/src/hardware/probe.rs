use gmachine_core::{
    BackendError, GMachineConfig, HardwareCapability, ProbeError, ProbeInitError, SensorKind,
    SnapshotSource, TelemetrySnapshot,
};
use tracing::{debug, info, instrument, warn};

use super::{HardwareBackend, HardwareUnit, UnitKind};
use crate::source::TelemetrySource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Uninitialized,
    Probing,
    Capable,
    Incapable,
}

/// Discovers GPU/CPU/memory units once and reads GPU sensors per tick
pub struct HardwareProbe<B: HardwareBackend> {
    backend: B,
    state: ProbeState,
    gpu: Option<HardwareUnit>,
    cpu: Option<HardwareUnit>,
    memory: Option<HardwareUnit>,
    core_pattern: String,
    default_vram_total_gb: f64,
    max_consecutive_failures: Option<u32>,
    consecutive_failures: u32,
    last: Option<TelemetrySnapshot>,
    released: bool,
}

impl<B: HardwareBackend> HardwareProbe<B> {
    /// Create the probe and run discovery immediately
    pub fn new(backend: B, config: &GMachineConfig) -> Self {
        let mut probe = Self {
            backend,
            state: ProbeState::Uninitialized,
            gpu: None,
            cpu: None,
            memory: None,
            core_pattern: config.telemetry.gpu_core_pattern.clone(),
            default_vram_total_gb: config.synthetic.vram_total_gb,
            max_consecutive_failures: config.telemetry.max_consecutive_failures,
            consecutive_failures: 0,
            last: None,
            released: false,
        };
        probe.probe();
        probe
    }

    #[instrument(skip(self))]
    fn probe(&mut self) {
        self.state = ProbeState::Probing;

        let units = match self.enumerate() {
            Ok(units) => units,
            Err(e) => {
                warn!("Hardware probing failed, using synthetic telemetry: {}", e);
                self.state = ProbeState::Incapable;
                return;
            }
        };

        for unit in units {
            let slot = match unit.kind {
                // a GPU without sensors cannot produce readings
                UnitKind::Gpu(_) if unit.all_sensors().is_empty() => {
                    debug!(unit = %unit.name, "Skipping GPU without sensors");
                    continue;
                }
                UnitKind::Gpu(_) => &mut self.gpu,
                UnitKind::Cpu => &mut self.cpu,
                UnitKind::Memory => &mut self.memory,
                UnitKind::Hwmon => continue,
            };
            if slot.is_none() {
                debug!(unit = %unit.name, "Found hardware unit");
                *slot = Some(unit);
            }
        }

        if let Some(gpu) = &self.gpu {
            info!(
                gpu = %gpu.name,
                cpu = self.cpu.is_some(),
                memory = self.memory.is_some(),
                "Hardware sensors available"
            );
            self.state = ProbeState::Capable;
        } else {
            info!(
                cpu = self.cpu.is_some(),
                memory = self.memory.is_some(),
                "No GPU sensors found, using synthetic telemetry"
            );
            self.state = ProbeState::Incapable;
        }
    }

    fn enumerate(&mut self) -> Result<Vec<HardwareUnit>, ProbeInitError> {
        self.backend.enumerate().map_err(ProbeInitError::Enumeration)
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Cached GPU, CPU and memory units, in that order
    pub fn units(&self) -> impl Iterator<Item = &HardwareUnit> {
        [&self.gpu, &self.cpu, &self.memory]
            .into_iter()
            .filter_map(|unit| unit.as_ref())
    }

    /// Update the GPU unit tree and extract a snapshot
    pub fn refresh(&mut self) -> Result<TelemetrySnapshot, ProbeError> {
        if self.state != ProbeState::Capable {
            return Err(ProbeError::NotCapable);
        }

        match self.read_gpu() {
            Ok(snapshot) => {
                if self.consecutive_failures > 0 {
                    info!(
                        "Sensor reads recovered after {} failures",
                        self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                self.last = Some(snapshot);
                Ok(snapshot)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures == 1 {
                    warn!("Sensor read failed: {}", e);
                } else {
                    debug!(failures = self.consecutive_failures, "Sensor read failed: {}", e);
                }

                if let Some(max) = self.max_consecutive_failures {
                    if self.consecutive_failures >= max {
                        warn!(
                            "{} consecutive read failures, disabling hardware sensors",
                            self.consecutive_failures
                        );
                        self.state = ProbeState::Incapable;
                    }
                }
                Err(ProbeError::ReadFailure(e))
            }
        }
    }

    fn read_gpu(&mut self) -> Result<TelemetrySnapshot, BackendError> {
        let previous = self.last.unwrap_or_else(|| {
            TelemetrySnapshot::idle(self.default_vram_total_gb, SnapshotSource::Real)
        });

        let Some(gpu) = self.gpu.as_mut() else {
            return Err(BackendError::Closed);
        };

        update_tree(&mut self.backend, gpu)?;

        let load = gpu.find_value(SensorKind::Load, &self.core_pattern);
        let used = gpu.find_value(SensorKind::MemoryUsed, "");
        let total = gpu.find_value(SensorKind::MemoryTotal, "");
        let temp = gpu.find_value(SensorKind::Temperature, &self.core_pattern);

        if load.is_none() && used.is_none() && total.is_none() && temp.is_none() {
            return Err(BackendError::NoReadings(gpu.name.clone()));
        }

        if total.is_none() {
            debug!("GPU memory total sensor missing, keeping {:.1} GB", previous.vram_total_gb);
        }

        Ok(TelemetrySnapshot {
            gpu_load_pct: load.unwrap_or(previous.gpu_load_pct),
            vram_used_gb: used.unwrap_or(previous.vram_used_gb),
            vram_total_gb: total.unwrap_or(previous.vram_total_gb),
            gpu_temp_c: temp.unwrap_or(previous.gpu_temp_c),
            source: SnapshotSource::Real,
        })
    }

    /// Close the backend. Safe to call repeatedly or after failed probing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.backend.close();
        self.gpu = None;
        self.cpu = None;
        self.memory = None;
        self.state = ProbeState::Incapable;
        info!("Hardware backend released");
    }
}

/// Update a unit, then every sub-unit below it
fn update_tree<B: HardwareBackend>(
    backend: &mut B,
    unit: &mut HardwareUnit,
) -> Result<(), BackendError> {
    backend.update(unit)?;
    for sub in &mut unit.sub_units {
        update_tree(backend, sub)?;
    }
    Ok(())
}

impl<B: HardwareBackend> TelemetrySource for HardwareProbe<B> {
    fn name(&self) -> &str {
        "hardware"
    }

    fn capability(&self) -> HardwareCapability {
        match self.state {
            ProbeState::Capable => HardwareCapability::Available,
            _ => HardwareCapability::Unavailable,
        }
    }

    fn refresh(&mut self) -> Result<TelemetrySnapshot, ProbeError> {
        HardwareProbe::refresh(self)
    }

    fn release(&mut self) {
        HardwareProbe::release(self)
    }
}

impl<B: HardwareBackend> Drop for HardwareProbe<B> {
    fn drop(&mut self) {
        self.release();
    }
}
