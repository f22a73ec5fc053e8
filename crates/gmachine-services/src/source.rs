use gmachine_core::{HardwareCapability, ProbeError, TelemetrySnapshot};

/// Narrow interface the scheduler samples through.
///
/// Implemented by the hardware probe and by the synthetic source, so the
/// scheduler can run against fakes without real sensors.
pub trait TelemetrySource: Send {
    fn name(&self) -> &str;

    fn capability(&self) -> HardwareCapability;

    fn refresh(&mut self) -> Result<TelemetrySnapshot, ProbeError>;

    /// Release backend resources. Must be idempotent.
    fn release(&mut self);
}

