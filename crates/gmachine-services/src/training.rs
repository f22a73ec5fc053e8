//! Simulated training loop.
//!
//! Produces randomized loss/accuracy per epoch and owns the
//! [`TrainingActivity`] flag the telemetry sampler reads.

use std::time::Duration;

use gmachine_core::{TrainingActivity, TrainingConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    Started {
        epochs: u32,
        batch_size: u32,
        learning_rate: f64,
    },
    Epoch {
        epoch: u32,
        epochs: u32,
        loss: f64,
        accuracy: f64,
    },
    Checkpoint {
        epoch: u32,
        file: String,
    },
    Completed {
        epochs: u32,
    },
    /// Stopped by the user after `epoch` epochs were reported
    Cancelled {
        epoch: u32,
    },
}

/// Loss and accuracy for one epoch, with the jitter drawn from `rng`
pub fn epoch_metrics<R: Rng>(epoch: u32, rng: &mut R) -> (f64, f64) {
    let epoch = epoch as f64;
    let loss = 2.5 - epoch * 0.02 + rng.gen::<f64>() * 0.1;
    let accuracy = 0.3 + epoch * 0.006 + rng.gen::<f64>() * 0.02;
    (loss.max(0.0), accuracy.min(1.0))
}

pub fn checkpoint_file(epoch: u32) -> String {
    format!("checkpoint_epoch_{}.pth", epoch)
}

/// Clears the activity flag however the run ends
struct ActivityGuard(TrainingActivity);

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.0.set_active(false);
    }
}

pub struct TrainingSimulator {
    config: TrainingConfig,
    activity: TrainingActivity,
}

impl TrainingSimulator {
    pub fn new(config: TrainingConfig, activity: TrainingActivity) -> Self {
        Self { config, activity }
    }

    /// Spawn the run on the current tokio runtime.
    ///
    /// The event channel closes when the run finishes.
    pub fn start(self) -> (mpsc::Receiver<TrainingEvent>, CancellationToken) {
        let (tx, rx) = mpsc::channel(100);
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();

        tokio::spawn(async move {
            self.run(run_cancel, tx).await;
        });

        (rx, cancel)
    }

    #[instrument(skip(self, cancel, tx), fields(epochs = self.config.epochs))]
    pub async fn run(&self, cancel: CancellationToken, tx: mpsc::Sender<TrainingEvent>) {
        self.activity.set_active(true);
        let _guard = ActivityGuard(self.activity.clone());
        info!("Training started");

        let epochs = self.config.epochs;
        let delay = Duration::from_millis(self.config.epoch_delay_ms);
        let mut rng = StdRng::from_entropy();

        let started = TrainingEvent::Started {
            epochs,
            batch_size: self.config.batch_size,
            learning_rate: self.config.learning_rate,
        };
        if tx.send(started).await.is_err() {
            return;
        }

        let mut reported = 0;
        for epoch in 1..=epochs {
            if cancel.is_cancelled() {
                break;
            }

            let (loss, accuracy) = epoch_metrics(epoch, &mut rng);
            debug!(epoch, loss, accuracy, "Epoch finished");
            let event = TrainingEvent::Epoch {
                epoch,
                epochs,
                loss,
                accuracy,
            };
            if tx.send(event).await.is_err() {
                debug!("Training receiver dropped");
                return;
            }
            reported = epoch;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if self.config.checkpoint_every > 0 && epoch % self.config.checkpoint_every == 0 {
                let file = checkpoint_file(epoch);
                if tx.send(TrainingEvent::Checkpoint { epoch, file }).await.is_err() {
                    return;
                }
            }
        }

        let finished = if reported == epochs && !cancel.is_cancelled() {
            info!("Training completed");
            TrainingEvent::Completed { epochs }
        } else {
            info!(epoch = reported, "Training cancelled");
            TrainingEvent::Cancelled { epoch: reported }
        };
        let _ = tx.send(finished).await;
    }
}
