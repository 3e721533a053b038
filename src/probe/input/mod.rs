//! User input probe, backed by the desktop's "time since last input" counter.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod win32;

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::Probe;
use crate::config::decode_section;
use crate::error::ProbeError;

const SECTION: &str = "input";

/// Reports how long the user has been away from keyboard and mouse.
pub trait IdleTimeSource: Send {
    fn idle_time(&mut self) -> Result<Duration, ProbeError>;
}

/// Platform backend: XScreenSaver on Linux, IOKit on macOS, Win32 on Windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformIdleTime;

impl IdleTimeSource for PlatformIdleTime {
    #[cfg(target_os = "linux")]
    fn idle_time(&mut self) -> Result<Duration, ProbeError> {
        linux::idle_time()
    }

    #[cfg(target_os = "macos")]
    fn idle_time(&mut self) -> Result<Duration, ProbeError> {
        macos::idle_time()
    }

    #[cfg(target_os = "windows")]
    fn idle_time(&mut self) -> Result<Duration, ProbeError> {
        win32::idle_time()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    fn idle_time(&mut self) -> Result<Duration, ProbeError> {
        Err(ProbeError::Unavailable(
            "no input idle backend for this platform".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct InputSection {
    #[serde(default)]
    enabled: Option<bool>,
    threshold_seconds: Option<u64>,
}

/// Active when user input happened within the last `threshold_seconds`.
pub struct InputProbe {
    source: Box<dyn IdleTimeSource>,
    enabled: bool,
    active: bool,
    threshold: Duration,
}

impl InputProbe {
    /// `default_threshold` applies when the section has no `threshold_seconds`.
    pub fn new(source: Box<dyn IdleTimeSource>, default_threshold: Duration) -> Self {
        Self {
            source,
            enabled: false,
            active: false,
            threshold: default_threshold,
        }
    }
}

impl Probe for InputProbe {
    fn name(&self) -> &str {
        SECTION
    }

    fn configure(&mut self, plugins: &toml::Table) -> bool {
        self.enabled = false;

        let section: InputSection = match decode_section(plugins, SECTION) {
            Ok(section) => section,
            Err(e) => {
                debug!("Input probe disabled: {}", e);
                return false;
            }
        };

        if section.enabled != Some(true) {
            return true;
        }

        if let Some(seconds) = section.threshold_seconds {
            self.threshold = Duration::from_secs(seconds);
        }

        // A backend that fails here, such as a missing display, disables the probe.
        if let Err(e) = self.source.idle_time() {
            warn!("Input idle time unavailable, probe disabled: {}", e);
            return false;
        }

        self.enabled = true;
        info!("input probe config: threshold={:?}", self.threshold);
        true
    }

    fn sample(&mut self) -> Result<(), ProbeError> {
        if !self.enabled {
            return Ok(());
        }

        let idle = self.source.idle_time()?;
        self.active = idle < self.threshold;
        debug!(idle = ?idle, active = self.active, "Input sampled");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.enabled && self.active
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
