//! Linux backend: DRM/hwmon sysfs for GPUs, sysinfo for host CPU and memory

use gmachine_core::{BackendError, SensorKind, SensorReading, TelemetryConfig};
use std::fs;
use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing::debug;

use super::{GpuVendor, HardwareBackend, HardwareUnit, UnitHandle, UnitKind};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub struct SysfsBackend {
    root: PathBuf,
    host_units: bool,
    system: Option<System>,
    closed: bool,
}

impl SysfsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            host_units: true,
            system: None,
            closed: false,
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(&config.sysfs_root).with_host_units(config.host_units)
    }

    pub fn with_host_units(mut self, enabled: bool) -> Self {
        self.host_units = enabled;
        self
    }

    fn drm_dir(&self) -> PathBuf {
        self.root.join("sys/class/drm")
    }

    fn gpu_units(&self) -> Result<Vec<HardwareUnit>, BackendError> {
        let drm = self.drm_dir();
        if !drm.is_dir() {
            debug!(path = %drm.display(), "No DRM class directory");
            return Ok(Vec::new());
        }

        let mut cards: Vec<PathBuf> = fs::read_dir(&drm)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| is_card_dir(path))
            .collect();
        cards.sort();

        Ok(cards.iter().filter_map(|card| gpu_unit(card)).collect())
    }

    fn host(&mut self) -> Result<&mut System, BackendError> {
        self.system.as_mut().ok_or(BackendError::Closed)
    }
}

impl HardwareBackend for SysfsBackend {
    fn enumerate(&mut self) -> Result<Vec<HardwareUnit>, BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }

        let mut units = self.gpu_units()?;

        if self.host_units {
            let system = self.system.get_or_insert_with(System::new);
            system.refresh_cpu();
            system.refresh_memory();

            if !system.cpus().is_empty() {
                units.push(
                    HardwareUnit::new(UnitKind::Cpu, "CPU", UnitHandle::HostCpu).with_sensor(
                        SensorReading::new("CPU Total", SensorKind::Load)
                            .with_value(system.global_cpu_info().cpu_usage() as f64),
                    ),
                );
            }
            if system.total_memory() > 0 {
                let mut memory = HardwareUnit::new(UnitKind::Memory, "Memory", UnitHandle::HostMemory);
                memory.sensors = memory_sensors(system);
                units.push(memory);
            }
        }

        Ok(units)
    }

    fn update(&mut self, unit: &mut HardwareUnit) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }

        let fresh = match &unit.handle {
            UnitHandle::Sysfs(dir) => {
                if !dir.is_dir() {
                    return Err(BackendError::Update(format!(
                        "{} is no longer present",
                        dir.display()
                    )));
                }
                match unit.kind {
                    UnitKind::Hwmon => hwmon_sensors(dir),
                    _ => gpu_sensors(&dir.join("device")),
                }
            }
            UnitHandle::HostCpu => {
                let system = self.host()?;
                system.refresh_cpu();
                vec![SensorReading::new("CPU Total", SensorKind::Load)
                    .with_value(system.global_cpu_info().cpu_usage() as f64)]
            }
            UnitHandle::HostMemory => {
                let system = self.host()?;
                system.refresh_memory();
                memory_sensors(system)
            }
            UnitHandle::Nvml(index) => {
                return Err(BackendError::Update(format!("NVML device {} is not a sysfs unit", index)));
            }
            UnitHandle::Named(name) => {
                return Err(BackendError::Update(format!("unknown unit {}", name)));
            }
        };

        for sensor in &mut unit.sensors {
            sensor.value = fresh
                .iter()
                .find(|f| f.kind == sensor.kind && f.name == sensor.name)
                .and_then(|f| f.value);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.system = None;
        self.closed = true;
    }
}

/// `cardN` entries only; connector entries such as `card0-DP-1` are skipped
fn is_card_dir(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy())
        .map(|name| name.starts_with("card") && !name.contains('-'))
        .unwrap_or(false)
}

fn gpu_unit(card: &Path) -> Option<HardwareUnit> {
    let device = card.join("device");
    let vendor_raw = fs::read_to_string(device.join("vendor")).ok()?;
    let vendor_id = u16::from_str_radix(vendor_raw.trim().trim_start_matches("0x"), 16).ok()?;
    let vendor = GpuVendor::from_pci_id(vendor_id);

    let card_name = card.file_name()?.to_string_lossy().to_string();
    let mut unit = HardwareUnit::new(
        UnitKind::Gpu(vendor),
        format!("{} ({})", card_name, vendor),
        UnitHandle::Sysfs(card.to_path_buf()),
    );
    unit.sensors = gpu_sensors(&device);

    let mut hwmons: Vec<PathBuf> = fs::read_dir(device.join("hwmon"))
        .map(|entries| entries.flatten().map(|e| e.path()).collect())
        .unwrap_or_default();
    hwmons.sort();

    for dir in hwmons {
        let sensors = hwmon_sensors(&dir);
        if sensors.is_empty() {
            continue;
        }
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut sub = HardwareUnit::new(UnitKind::Hwmon, name, UnitHandle::Sysfs(dir.clone()));
        sub.sensors = sensors;
        unit.sub_units.push(sub);
    }

    debug!(unit = %unit.name, sensors = unit.all_sensors().len(), "Discovered GPU");
    Some(unit)
}

fn gpu_sensors(device: &Path) -> Vec<SensorReading> {
    let files = [
        ("gpu_busy_percent", "GPU Core", SensorKind::Load, 1.0),
        ("mem_info_vram_used", "GPU Memory Used", SensorKind::MemoryUsed, BYTES_PER_GB),
        ("mem_info_vram_total", "GPU Memory Total", SensorKind::MemoryTotal, BYTES_PER_GB),
    ];

    files
        .into_iter()
        .filter(|(file, ..)| device.join(file).exists())
        .map(|(file, name, kind, divisor)| {
            let mut sensor = SensorReading::new(name, kind);
            sensor.value = read_number(&device.join(file)).map(|v| v / divisor);
            sensor
        })
        .collect()
}

fn hwmon_sensors(dir: &Path) -> Vec<SensorReading> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut indices: Vec<u32> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.strip_prefix("temp")?
                .strip_suffix("_input")?
                .parse()
                .ok()
        })
        .collect();
    indices.sort_unstable();

    indices
        .into_iter()
        .map(|index| {
            let label = fs::read_to_string(dir.join(format!("temp{}_label", index))).ok();
            let mut sensor =
                SensorReading::new(temperature_name(index, label.as_deref()), SensorKind::Temperature);
            sensor.value = read_number(&dir.join(format!("temp{}_input", index)))
                .map(|millidegrees| millidegrees / 1000.0);
            sensor
        })
        .collect()
}

fn temperature_name(index: u32, label: Option<&str>) -> String {
    let label = label.map(|l| l.trim().to_lowercase());
    match label.as_deref() {
        Some("edge") => "GPU Core".to_string(),
        Some("junction") => "GPU Hot Spot".to_string(),
        Some("mem") => "GPU Memory".to_string(),
        None if index == 1 => "GPU Core".to_string(),
        _ => format!("GPU Temp {}", index),
    }
}

fn memory_sensors(system: &System) -> Vec<SensorReading> {
    vec![
        SensorReading::new("Memory Used", SensorKind::MemoryUsed)
            .with_value(system.used_memory() as f64 / BYTES_PER_GB),
        SensorReading::new("Memory Total", SensorKind::MemoryTotal)
            .with_value(system.total_memory() as f64 / BYTES_PER_GB),
    ]
}

/// Parse a numeric sysfs attribute; `nan`/`inf` count as unreadable
fn read_number(path: &Path) -> Option<f64> {
    fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{HardwareProbe, ProbeState};
    use crate::source::TelemetrySource;
    use gmachine_core::{GMachineConfig, HardwareCapability, ProbeError, SnapshotSource};
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    /// One AMD card with VRAM and two hwmon temperatures, plus noise entries
    fn amd_fixture() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let device = "sys/class/drm/card0/device";
        write(root, &format!("{}/vendor", device), "0x1002\n");
        write(root, &format!("{}/gpu_busy_percent", device), "37\n");
        write(root, &format!("{}/mem_info_vram_used", device), "4294967296\n");
        write(root, &format!("{}/mem_info_vram_total", device), "17179869184\n");
        write(root, &format!("{}/hwmon/hwmon3/temp1_input", device), "54000\n");
        write(root, &format!("{}/hwmon/hwmon3/temp1_label", device), "edge\n");
        write(root, &format!("{}/hwmon/hwmon3/temp2_input", device), "61000\n");
        write(root, &format!("{}/hwmon/hwmon3/temp2_label", device), "junction\n");
        write(root, "sys/class/drm/card0-DP-1/status", "connected\n");
        write(root, "sys/class/drm/card1/uevent", "DRIVER=simpledrm\n");
        dir
    }

    fn config_for(root: &Path) -> GMachineConfig {
        let mut config = GMachineConfig::default();
        config.telemetry.sysfs_root = root.to_path_buf();
        config.telemetry.host_units = false;
        config
    }

    #[test]
    fn test_enumerate_amd_card() {
        let fixture = amd_fixture();
        let mut backend = SysfsBackend::new(fixture.path()).with_host_units(false);

        let units = backend.enumerate().unwrap();
        assert_eq!(units.len(), 1);

        let gpu = &units[0];
        assert_eq!(gpu.kind, UnitKind::Gpu(GpuVendor::Amd));
        assert_eq!(gpu.name, "card0 (AMD)");
        assert_eq!(gpu.sensors.len(), 3);
        assert_eq!(gpu.sub_units.len(), 1);

        let names: Vec<&str> = gpu.sub_units[0].sensors.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["GPU Core", "GPU Hot Spot"]);
    }

    #[test]
    fn test_reads_fixture_in_gb_and_celsius() {
        let fixture = amd_fixture();
        let config = config_for(fixture.path());
        let mut probe = HardwareProbe::new(SysfsBackend::from_config(&config.telemetry), &config);
        assert_eq!(probe.capability(), HardwareCapability::Available);

        let snapshot = probe.refresh().unwrap();
        assert_eq!(snapshot.gpu_load_pct, 37.0);
        assert_eq!(snapshot.vram_used_gb, 4.0);
        assert_eq!(snapshot.vram_total_gb, 16.0);
        assert_eq!(snapshot.gpu_temp_c, 54.0);
        assert_eq!(snapshot.source, SnapshotSource::Real);

        write(fixture.path(), "sys/class/drm/card0/device/gpu_busy_percent", "88\n");
        assert_eq!(probe.refresh().unwrap().gpu_load_pct, 88.0);
    }

    #[test]
    fn test_removed_card_is_read_failure() {
        let fixture = amd_fixture();
        let config = config_for(fixture.path());
        let mut probe = HardwareProbe::new(SysfsBackend::from_config(&config.telemetry), &config);
        probe.refresh().unwrap();

        fs::remove_dir_all(fixture.path().join("sys/class/drm/card0")).unwrap();
        assert!(matches!(probe.refresh(), Err(ProbeError::ReadFailure(_))));
        assert_eq!(probe.state(), ProbeState::Capable);
    }

    #[test]
    fn test_missing_sensor_file_degrades_single_field() {
        let fixture = amd_fixture();
        fs::remove_file(fixture.path().join("sys/class/drm/card0/device/mem_info_vram_total"))
            .unwrap();
        let config = config_for(fixture.path());
        let mut probe = HardwareProbe::new(SysfsBackend::from_config(&config.telemetry), &config);

        let snapshot = probe.refresh().unwrap();
        assert_eq!(snapshot.vram_used_gb, 4.0);
        assert_eq!(snapshot.vram_total_gb, 12.0);
    }

    #[test]
    fn test_no_drm_directory_is_incapable() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        let probe = HardwareProbe::new(SysfsBackend::from_config(&config.telemetry), &config);
        assert_eq!(probe.state(), ProbeState::Incapable);
    }

    #[test]
    fn test_intel_card_without_sensors_still_detected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sys/class/drm/card0/device/vendor", "0x8086\n");
        let mut backend = SysfsBackend::new(dir.path()).with_host_units(false);

        let units = backend.enumerate().unwrap();
        assert_eq!(units[0].kind, UnitKind::Gpu(GpuVendor::Intel));
        assert!(units[0].all_sensors().is_empty());
    }

    #[test]
    fn test_nvidia_card_without_sysfs_sensors_is_incapable() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sys/class/drm/card0/device/vendor", "0x10de\n");
        let mut config = config_for(dir.path());
        config.telemetry.host_units = true;

        let mut probe = HardwareProbe::new(SysfsBackend::from_config(&config.telemetry), &config);
        assert_eq!(probe.state(), ProbeState::Incapable);
        assert!(matches!(probe.refresh(), Err(ProbeError::NotCapable)));
    }

    #[test]
    fn test_non_finite_value_is_unreadable() {
        let fixture = amd_fixture();
        write(fixture.path(), "sys/class/drm/card0/device/gpu_busy_percent", "nan\n");
        write(fixture.path(), "sys/class/drm/card0/device/mem_info_vram_used", "inf\n");
        let config = config_for(fixture.path());
        let mut probe = HardwareProbe::new(SysfsBackend::from_config(&config.telemetry), &config);

        let snapshot = probe.refresh().unwrap();
        assert_eq!(snapshot.gpu_load_pct, 0.0);
        assert_eq!(snapshot.vram_used_gb, 0.0);
        assert_eq!(snapshot.vram_total_gb, 16.0);
        assert_eq!(snapshot.gpu_temp_c, 54.0);
    }

    #[test]
    fn test_update_after_close_fails() {
        let fixture = amd_fixture();
        let mut backend = SysfsBackend::new(fixture.path()).with_host_units(false);
        let mut units = backend.enumerate().unwrap();

        backend.close();
        backend.close();
        assert!(matches!(backend.update(&mut units[0]), Err(BackendError::Closed)));
        assert!(matches!(backend.enumerate(), Err(BackendError::Closed)));
    }

    #[test]
    fn test_temperature_names() {
        assert_eq!(temperature_name(1, Some("edge\n")), "GPU Core");
        assert_eq!(temperature_name(2, Some("junction")), "GPU Hot Spot");
        assert_eq!(temperature_name(3, Some("mem")), "GPU Memory");
        assert_eq!(temperature_name(1, None), "GPU Core");
        assert_eq!(temperature_name(2, None), "GPU Temp 2");
        assert_eq!(temperature_name(4, Some("vddgfx")), "GPU Temp 4");
    }
}
