//! Presentation-ready formatting of telemetry snapshots

use gmachine_core::{SnapshotSource, TelemetrySnapshot};
use serde::Serialize;

/// Setters exposed by whatever renders the GPU panel
pub trait DisplaySurface {
    fn set_gpu_usage(&mut self, text: &str, gauge: f64);
    fn set_vram_text(&mut self, text: &str);
    fn set_vram_gauge(&mut self, gauge: f64);
    fn set_temperature(&mut self, text: &str, gauge: f64);

    fn set_source(&mut self, _source: SnapshotSource) {}
}

/// Formatted strings plus gauge values clamped into [0, 100]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayMetrics {
    pub gpu_usage_text: String,
    pub gpu_usage_gauge: f64,
    pub vram_text: String,
    pub vram_gauge: f64,
    pub temperature_text: String,
    pub temperature_gauge: f64,
    pub source: SnapshotSource,
}

impl DisplayMetrics {
    pub fn from_snapshot(snapshot: &TelemetrySnapshot) -> Self {
        let vram_pct = if snapshot.vram_total_gb > 0.0 {
            snapshot.vram_used_gb / snapshot.vram_total_gb * 100.0
        } else {
            0.0
        };

        Self {
            gpu_usage_text: format!("{:.1}%", snapshot.gpu_load_pct),
            gpu_usage_gauge: gauge(snapshot.gpu_load_pct),
            vram_text: format!("{:.1}/{:.1}GB", snapshot.vram_used_gb, snapshot.vram_total_gb),
            vram_gauge: gauge(vram_pct),
            temperature_text: format!("{:.0}°C", snapshot.gpu_temp_c),
            temperature_gauge: gauge(snapshot.gpu_temp_c),
            source: snapshot.source,
        }
    }
}

fn gauge(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Receives one snapshot per tick on the owner thread
#[derive(Default)]
pub struct MetricsSink {
    surface: Option<Box<dyn DisplaySurface>>,
    latest: Option<DisplayMetrics>,
    published: u64,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_surface(surface: Box<dyn DisplaySurface>) -> Self {
        Self {
            surface: Some(surface),
            ..Self::default()
        }
    }

    pub fn publish(&mut self, snapshot: TelemetrySnapshot) -> &DisplayMetrics {
        let metrics = DisplayMetrics::from_snapshot(&snapshot);

        if let Some(surface) = self.surface.as_mut() {
            surface.set_gpu_usage(&metrics.gpu_usage_text, metrics.gpu_usage_gauge);
            surface.set_vram_text(&metrics.vram_text);
            surface.set_vram_gauge(metrics.vram_gauge);
            surface.set_temperature(&metrics.temperature_text, metrics.temperature_gauge);
            surface.set_source(metrics.source);
        }

        self.published += 1;
        self.latest.insert(metrics)
    }

    pub fn latest(&self) -> Option<&DisplayMetrics> {
        self.latest.as_ref()
    }

    pub fn published(&self) -> u64 {
        self.published
    }
}
