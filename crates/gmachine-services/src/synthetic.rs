//! Synthetic GPU telemetry, used whenever no real sensors can be read

use gmachine_core::{
    HardwareCapability, ProbeError, SampleRange, SnapshotSource, SyntheticConfig,
    TelemetrySnapshot, TrainingActivity,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::source::TelemetrySource;

/// Upper bound for any percentage or temperature shown on a gauge
const GAUGE_MAX: f64 = 100.0;

pub struct SyntheticSampler {
    config: SyntheticConfig,
    rng: StdRng,
}

impl SyntheticSampler {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sampler for reproducible runs
    pub fn with_seed(config: SyntheticConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn idle(&self) -> TelemetrySnapshot {
        TelemetrySnapshot::idle(self.config.vram_total_gb, SnapshotSource::Synthetic)
    }

    pub fn sample(&mut self, training_active: bool) -> TelemetrySnapshot {
        if !training_active {
            return self.idle();
        }

        let total = self.config.vram_total_gb;
        let load = self.draw(self.config.load_pct);
        let vram_used = self.draw(self.config.vram_used_gb);
        let temp = self.draw(self.config.temperature_c);

        TelemetrySnapshot {
            gpu_load_pct: load.clamp(0.0, GAUGE_MAX),
            vram_used_gb: vram_used.clamp(0.0, total.max(0.0)),
            vram_total_gb: total,
            gpu_temp_c: temp.clamp(0.0, GAUGE_MAX),
            source: SnapshotSource::Synthetic,
        }
    }

    fn draw(&mut self, range: SampleRange) -> f64 {
        if range.min >= range.max {
            return range.min;
        }
        self.rng.gen_range(range.min..=range.max)
    }
}

impl Default for SyntheticSampler {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

/// Sampler exposed through the same interface as a hardware probe.
///
/// Always available and never fails.
pub struct SyntheticSource {
    sampler: SyntheticSampler,
    training: TrainingActivity,
}

impl SyntheticSource {
    pub fn new(sampler: SyntheticSampler, training: TrainingActivity) -> Self {
        Self { sampler, training }
    }
}

impl TelemetrySource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn capability(&self) -> HardwareCapability {
        HardwareCapability::Available
    }

    fn refresh(&mut self) -> Result<TelemetrySnapshot, ProbeError> {
        Ok(self.sampler.sample(self.training.is_active()))
    }

    fn release(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_sample_is_stable() {
        let mut sampler = SyntheticSampler::default();
        let first = sampler.sample(false);

        for _ in 0..50 {
            assert_eq!(sampler.sample(false), first);
        }
        assert_eq!(first.gpu_load_pct, 0.0);
        assert_eq!(first.vram_used_gb, 0.0);
        assert_eq!(first.vram_total_gb, 12.0);
        assert_eq!(first.gpu_temp_c, 0.0);
        assert_eq!(first.source, SnapshotSource::Synthetic);
    }

    #[test]
    fn test_active_samples_within_bounds() {
        let mut sampler = SyntheticSampler::with_seed(SyntheticConfig::default(), 7);

        for _ in 0..1000 {
            let s = sampler.sample(true);
            assert!((45.0..=75.0).contains(&s.gpu_load_pct), "load {}", s.gpu_load_pct);
            assert!((6.5..=8.5).contains(&s.vram_used_gb), "vram {}", s.vram_used_gb);
            assert!((65.0..=80.0).contains(&s.gpu_temp_c), "temp {}", s.gpu_temp_c);
            assert_eq!(s.vram_total_gb, 12.0);
            assert_eq!(s.source, SnapshotSource::Synthetic);
        }
    }

    #[test]
    fn test_out_of_range_config_is_clamped() {
        let config = SyntheticConfig {
            vram_total_gb: 4.0,
            load_pct: SampleRange::new(150.0, 200.0),
            vram_used_gb: SampleRange::new(6.0, 8.0),
            temperature_c: SampleRange::new(105.0, 120.0),
        };
        let mut sampler = SyntheticSampler::with_seed(config, 1);

        let s = sampler.sample(true);
        assert_eq!(s.gpu_load_pct, 100.0);
        assert_eq!(s.gpu_temp_c, 100.0);
        assert_eq!(s.vram_used_gb, 4.0);
    }

    #[test]
    fn test_inverted_range_never_panics() {
        let config = SyntheticConfig {
            load_pct: SampleRange::new(60.0, 40.0),
            ..SyntheticConfig::default()
        };
        let mut sampler = SyntheticSampler::with_seed(config, 3);
        assert_eq!(sampler.sample(true).gpu_load_pct, 60.0);
    }

    #[test]
    fn test_seeded_samplers_agree() {
        let mut a = SyntheticSampler::with_seed(SyntheticConfig::default(), 42);
        let mut b = SyntheticSampler::with_seed(SyntheticConfig::default(), 42);
        assert_eq!(a.sample(true), b.sample(true));
    }

    #[test]
    fn test_source_follows_training_flag() {
        let training = TrainingActivity::new();
        let mut source = SyntheticSource::new(SyntheticSampler::default(), training.clone());
        assert_eq!(source.capability(), HardwareCapability::Available);

        let idle = source.refresh().unwrap();
        assert_eq!(idle.gpu_load_pct, 0.0);

        training.set_active(true);
        let busy = source.refresh().unwrap();
        assert!(busy.gpu_load_pct >= 45.0);

        source.release();
        source.release();
    }
}
