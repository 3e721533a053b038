//! Network throughput probe.

use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{NetworkTotals, Probe, SystemStats};
use crate::clock::Clock;
use crate::config::decode_section;
use crate::error::ProbeError;

const SECTION: &str = "network";
const DEFAULT_SPEED: f64 = 10.0 * 1024.0;

/// Speed in bytes per second, either a number or a string such as "512K".
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Speed {
    Number(f64),
    Text(String),
}

impl Speed {
    fn bytes_per_second(&self) -> Option<f64> {
        match self {
            Speed::Number(value) => Some(*value),
            Speed::Text(text) => parse_speed(text),
        }
    }
}

/// Parse "10", "10K" or "1.5M" (1024-based) into bytes.
fn parse_speed(text: &str) -> Option<f64> {
    let text = text.trim();
    let (digits, multiplier) = match text.chars().last()? {
        'K' | 'k' => (&text[..text.len() - 1], 1024.0),
        'M' | 'm' => (&text[..text.len() - 1], 1024.0 * 1024.0),
        _ => (text, 1.0),
    };
    digits.trim().parse::<f64>().ok().map(|value| value * multiplier)
}

#[derive(Debug, Deserialize)]
struct NetworkSection {
    #[serde(default)]
    enabled: Option<bool>,
    download_speed: Option<Speed>,
    upload_speed: Option<Speed>,
}

/// Active while receive or transmit throughput reaches its threshold.
pub struct NetworkProbe {
    stats: Box<dyn SystemStats>,
    clock: Arc<dyn Clock>,
    enabled: bool,
    active: bool,
    download: f64,
    upload: f64,
    previous: Option<(Instant, NetworkTotals)>,
}

impl NetworkProbe {
    pub fn new(stats: Box<dyn SystemStats>, clock: Arc<dyn Clock>) -> Self {
        Self {
            stats,
            clock,
            enabled: false,
            active: false,
            download: DEFAULT_SPEED,
            upload: DEFAULT_SPEED,
            previous: None,
        }
    }
}

fn resolve(key: &str, speed: Option<Speed>) -> f64 {
    match speed {
        None => DEFAULT_SPEED,
        Some(speed) => match speed.bytes_per_second() {
            Some(value) if value >= 0.0 => value,
            _ => {
                warn!("'{}' = {:?} is not a valid speed, using default", key, speed);
                DEFAULT_SPEED
            }
        },
    }
}

impl Probe for NetworkProbe {
    fn name(&self) -> &str {
        SECTION
    }

    fn configure(&mut self, plugins: &toml::Table) -> bool {
        self.enabled = false;

        let section: NetworkSection = match decode_section(plugins, SECTION) {
            Ok(section) => section,
            Err(e) => {
                debug!("Network probe disabled: {}", e);
                return false;
            }
        };

        if section.enabled != Some(true) {
            return true;
        }

        self.download = resolve("download_speed", section.download_speed);
        self.upload = resolve("upload_speed", section.upload_speed);
        self.enabled = true;
        info!(
            "network probe config: download_speed={} B/s, upload_speed={} B/s",
            self.download, self.upload
        );
        true
    }

    fn sample(&mut self) -> Result<(), ProbeError> {
        if !self.enabled {
            return Ok(());
        }

        let totals = self.stats.network_totals()?;
        let now = self.clock.now();

        self.active = match self.previous {
            Some((at, before)) => {
                let seconds = now.duration_since(at).as_secs_f64();
                if seconds > 0.0 {
                    let down = totals.received.saturating_sub(before.received) as f64 / seconds;
                    let up = totals.transmitted.saturating_sub(before.transmitted) as f64 / seconds;
                    debug!(down, up, "Network throughput sampled");
                    down >= self.download || up >= self.upload
                } else {
                    self.active
                }
            }
            // First sample only primes the counters.
            None => false,
        };

        self.previous = Some((now, totals));
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.enabled && self.active
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
