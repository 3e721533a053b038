//! Fixed-cadence cycle scheduler.
//!
//! Each cycle starts no earlier than one interval after the previous cycle
//! started. Time spent sampling is subtracted from the next sleep; a cycle
//! that overruns makes the next one start immediately, without catching up
//! on the cycles it skipped.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::probe::ProbeRegistry;

pub struct CycleScheduler {
    interval: Duration,
    clock: Arc<dyn Clock>,
    registry: ProbeRegistry,
    last_cycle_started_at: Option<Instant>,
    cycles: u64,
}

impl CycleScheduler {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        info!("scheduler config: interval={:?}", interval);
        Self {
            interval,
            clock,
            registry: ProbeRegistry::new(),
            last_cycle_started_at: None,
            cycles: 0,
        }
    }

    pub fn set_registry(&mut self, registry: ProbeRegistry) {
        self.registry = registry;
    }

    pub fn registry(&self) -> &ProbeRegistry {
        &self.registry
    }

    /// Number of completed cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Time left until the next cycle may start. Zero when the previous cycle overran.
    pub fn sleep_duration(&self) -> Duration {
        match self.last_cycle_started_at {
            Some(started) => self
                .interval
                .saturating_sub(self.clock.now().saturating_duration_since(started)),
            None => Duration::ZERO,
        }
    }

    /// Sleep until the next cycle boundary, then sample every enabled probe.
    ///
    /// A probe that fails to sample keeps its previous state; the others are
    /// still sampled. Dropping the future during the sleep leaves the
    /// scheduler untouched.
    pub async fn run_cycle(&mut self) {
        let sleep = self.sleep_duration();
        if !sleep.is_zero() {
            tokio::time::sleep(sleep).await;
        } else if self.last_cycle_started_at.is_some() {
            debug!("Previous cycle overran the interval, starting immediately");
        }

        self.last_cycle_started_at = Some(self.clock.now());
        self.cycles += 1;

        for probe in self.registry.all_mut() {
            if !probe.is_enabled() {
                continue;
            }
            if let Err(e) = probe.sample() {
                warn!(probe = probe.name(), "Sampling failed, keeping last state: {}", e);
            }
        }

        debug!(cycle = self.cycles, any_active = self.registry.any_active(), "Cycle complete");
    }
}
