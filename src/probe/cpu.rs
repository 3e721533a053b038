//! CPU utilization probe.

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{Probe, SystemStats};
use crate::config::decode_section;
use crate::error::ProbeError;

const SECTION: &str = "cpu";
const MAX_THRESHOLD: f32 = 100.0;

#[derive(Debug, Deserialize)]
struct CpuSection {
    #[serde(default)]
    enabled: Option<bool>,
    /// Average load over all cores, in percent.
    #[serde(default)]
    total_cpu_threshold: f32,
    /// Load of any single core, in percent.
    #[serde(default)]
    per_cpu_threshold: f32,
}

/// Active when the summed load of all cores reaches `total_cpu_threshold`
/// scaled by the core count, or any one core reaches `per_cpu_threshold`.
///
/// A threshold of 0 switches that criterion off.
pub struct CpuProbe {
    stats: Box<dyn SystemStats>,
    enabled: bool,
    active: bool,
    total_threshold: f32,
    per_cpu_threshold: f32,
}

impl CpuProbe {
    pub fn new(stats: Box<dyn SystemStats>) -> Self {
        Self {
            stats,
            enabled: false,
            active: false,
            total_threshold: 0.0,
            per_cpu_threshold: 0.0,
        }
    }

    /// Evaluate one set of per-core readings.
    fn evaluate(&self, per_core: &[f32]) -> bool {
        let mut active = false;

        if self.per_cpu_threshold > 0.0 {
            for (index, usage) in per_core.iter().enumerate() {
                if *usage >= self.per_cpu_threshold {
                    info!(cpu = index, usage, threshold = self.per_cpu_threshold, "Core usage above threshold");
                    active = true;
                }
            }
        }

        if self.total_threshold > 0.0 {
            let total: f32 = per_core.iter().sum();
            let scaled = self.total_threshold * per_core.len() as f32;
            if total >= scaled {
                info!(total, threshold = scaled, "Total CPU usage above threshold");
                active = true;
            } else {
                debug!(total, threshold = scaled, "Total CPU usage below threshold");
            }
        }

        active
    }
}

fn checked_threshold(key: &str, value: f32) -> f32 {
    if (0.0..=MAX_THRESHOLD).contains(&value) {
        value
    } else {
        warn!("'{}' = {} is outside 0..={}, ignored", key, value, MAX_THRESHOLD);
        0.0
    }
}

impl Probe for CpuProbe {
    fn name(&self) -> &str {
        SECTION
    }

    fn configure(&mut self, plugins: &toml::Table) -> bool {
        self.enabled = false;

        let section: CpuSection = match decode_section(plugins, SECTION) {
            Ok(section) => section,
            Err(e) => {
                debug!("CPU probe disabled: {}", e);
                return false;
            }
        };

        if section.enabled != Some(true) {
            debug!("'{}' has no enabled = true, probe disabled", SECTION);
            return true;
        }

        self.total_threshold = checked_threshold("total_cpu_threshold", section.total_cpu_threshold);
        self.per_cpu_threshold = checked_threshold("per_cpu_threshold", section.per_cpu_threshold);

        if self.total_threshold == 0.0 && self.per_cpu_threshold == 0.0 {
            warn!("Both CPU thresholds are 0, probe disabled");
            return true;
        }

        self.enabled = true;
        info!(
            "cpu probe config: per_cpu_threshold={}, total_cpu_threshold={}",
            self.per_cpu_threshold, self.total_threshold
        );
        true
    }

    fn sample(&mut self) -> Result<(), ProbeError> {
        if !self.enabled {
            return Ok(());
        }

        let per_core = self.stats.cpu_usage()?;
        self.active = self.evaluate(&per_core);
        debug!(?per_core, active = self.active, "CPU sampled");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.enabled && self.active
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
