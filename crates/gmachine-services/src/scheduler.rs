use std::sync::mpsc::{
    channel, sync_channel, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use gmachine_core::{SnapshotSource, TelemetrySnapshot, TrainingActivity};
use tracing::{debug, info, warn};

use crate::sink::MetricsSink;
use crate::source::TelemetrySource;
use crate::synthetic::SyntheticSampler;

/// Snapshots held for the owner before new ones are dropped
pub const SNAPSHOT_QUEUE_DEPTH: usize = 64;

/// Counters kept across ticks, returned when the scheduler stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    pub real: u64,
    pub synthetic: u64,
    pub read_failures: u64,
    /// Snapshots discarded because the owner stopped draining
    pub dropped: u64,
}

/// Decides, once per tick, which backend produces the snapshot
pub struct TelemetryScheduler {
    source: Box<dyn TelemetrySource>,
    sampler: SyntheticSampler,
    training: TrainingActivity,
    interval: Duration,
    stats: TickStats,
}

impl TelemetryScheduler {
    pub fn new(
        source: Box<dyn TelemetrySource>,
        sampler: SyntheticSampler,
        training: TrainingActivity,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            sampler,
            training,
            interval,
            stats: TickStats::default(),
        }
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    /// Produce exactly one snapshot. Never fails.
    pub fn tick(&mut self) -> TelemetrySnapshot {
        let training_active = self.training.is_active();

        let snapshot = if self.source.capability().is_available() {
            match self.source.refresh() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    self.stats.read_failures += 1;
                    debug!(source = self.source.name(), "Falling back to synthetic: {}", e);
                    self.sampler.sample(training_active)
                }
            }
        } else {
            self.sampler.sample(training_active)
        };

        self.stats.ticks += 1;
        match snapshot.source {
            SnapshotSource::Real => self.stats.real += 1,
            SnapshotSource::Synthetic => self.stats.synthetic += 1,
        }
        snapshot
    }

    /// Release the underlying source. Idempotent.
    pub fn release(&mut self) {
        self.source.release();
    }

    /// Run ticks on a dedicated timer thread.
    ///
    /// Snapshots are delivered over a channel; the owner drains them with
    /// [`SchedulerHandle::drain_into`] so publishing stays on one thread.
    pub fn start(mut self) -> SchedulerHandle {
        info!(
            source = self.source.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Starting telemetry scheduler"
        );
        let (tx, rx) = sync_channel(SNAPSHOT_QUEUE_DEPTH);
        let (stop_tx, stop_rx) = channel::<()>();

        let worker = thread::spawn(move || {
            let interval = self.interval;
            let mut next = Instant::now() + interval;

            loop {
                let wait = next.saturating_duration_since(Instant::now());
                match stop_rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }

                let snapshot = self.tick();
                match tx.try_send(snapshot) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.stats.dropped += 1;
                        if self.stats.dropped == 1 {
                            warn!("Telemetry queue full, dropping snapshots until drained");
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("Telemetry receiver dropped, stopping");
                        break;
                    }
                }

                // a slow tick delays the next one; ticks are never skipped
                next += interval;
            }

            self.release();
            info!(
                ticks = self.stats.ticks,
                dropped = self.stats.dropped,
                "Telemetry scheduler stopped"
            );
            self.stats
        });

        SchedulerHandle {
            rx,
            stop_tx: Some(stop_tx),
            worker: Some(worker),
            stats: None,
        }
    }
}

/// Owner-side end of a running scheduler
pub struct SchedulerHandle {
    rx: Receiver<TelemetrySnapshot>,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<TickStats>>,
    stats: Option<TickStats>,
}

impl SchedulerHandle {
    /// Publish every pending snapshot, in tick order. Returns how many were published.
    pub fn drain_into(&self, sink: &mut MetricsSink) -> usize {
        let mut published = 0;
        loop {
            match self.rx.try_recv() {
                Ok(snapshot) => {
                    sink.publish(snapshot);
                    published += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        published
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<TelemetrySnapshot> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop the timer, wait for an in-flight tick, then release the source.
    ///
    /// Safe to call more than once; later calls return the same stats.
    pub fn shutdown(&mut self) -> Option<TickStats> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(stats) => self.stats = Some(stats),
                Err(_) => warn!("Telemetry scheduler thread panicked"),
            }
        }
        self.stats
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
