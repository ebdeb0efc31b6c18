//! Background decay loop.
//!
//! Runs a decay pass every `decay_interval_secs` until the shutdown signal
//! fires. A pass that overruns `decay_timeout_secs` is abandoned and the
//! loop waits for the next tick.

use keepsake_memory::decay::DecayEngine;
use keepsake_types::config::MemoryConfig;
use keepsake_types::memory::DecayReport;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Periodic driver for [`DecayEngine`].
pub struct DecayScheduler {
    engine: DecayEngine,
    interval: Duration,
    pass_timeout: Duration,
}

impl DecayScheduler {
    pub fn new(engine: DecayEngine, interval: Duration, pass_timeout: Duration) -> Self {
        Self {
            engine,
            interval,
            pass_timeout,
        }
    }

    pub fn from_config(engine: DecayEngine, config: &MemoryConfig) -> Self {
        Self::new(
            engine,
            Duration::from_secs(config.decay_interval_secs),
            Duration::from_secs(config.decay_timeout_secs),
        )
    }

    /// Spawn the loop. It exits when `shutdown` changes or its sender drops.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        info!(
            interval_secs = self.interval.as_secs(),
            timeout_secs = self.pass_timeout.as_secs(),
            "Starting decay loop"
        );
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {}
                    _ = shutdown.changed() => {
                        info!("Decay loop: shutdown signal received");
                        break;
                    }
                }
                self.run_once().await;
            }
        })
    }

    /// One bounded pass. Failures are logged, never propagated.
    pub async fn run_once(&self) -> Option<DecayReport> {
        match tokio::time::timeout(self.pass_timeout, self.engine.decay_all()).await {
            Ok(Ok(report)) => {
                debug!(duration_ms = report.duration_ms, "Scheduled decay pass finished");
                Some(report)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Scheduled decay pass failed");
                None
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.pass_timeout.as_secs(),
                    "Scheduled decay pass timed out"
                );
                None
            }
        }
    }
}
