//! Kick-file probe: touching a configured file keeps the machine alive for one cycle.

use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::Probe;
use crate::config::decode_section;
use crate::error::ProbeError;

const SECTION: &str = "kick";

#[derive(Debug, Deserialize)]
struct KickSection {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    files: Vec<PathBuf>,
}

pub struct KickProbe {
    enabled: bool,
    active: bool,
    files: Vec<PathBuf>,
}

impl KickProbe {
    pub fn new() -> Self {
        Self {
            enabled: false,
            active: false,
            files: Vec::new(),
        }
    }
}

impl Default for KickProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for KickProbe {
    fn name(&self) -> &str {
        SECTION
    }

    fn configure(&mut self, plugins: &toml::Table) -> bool {
        self.enabled = false;

        let section: KickSection = match decode_section(plugins, SECTION) {
            Ok(section) => section,
            Err(e) => {
                debug!("Kick probe disabled: {}", e);
                return false;
            }
        };

        if section.enabled != Some(true) || section.files.is_empty() {
            return true;
        }

        self.files = section.files;
        self.enabled = true;
        info!("kick probe config: files={:?}", self.files);
        true
    }

    fn sample(&mut self) -> Result<(), ProbeError> {
        if !self.enabled {
            return Ok(());
        }

        // Every file is tried: a consumed kick must count even if a later removal fails.
        let mut kicked = Vec::new();
        let mut first_error = None;
        for file in &self.files {
            if !file.exists() {
                continue;
            }
            match std::fs::remove_file(file) {
                Ok(()) => kicked.push(file),
                Err(e) => {
                    warn!(file = %file.display(), "Failed to remove kick file: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if !kicked.is_empty() {
            debug!("Kicked by {:?}", kicked);
        }
        self.active = !kicked.is_empty();

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn is_active(&self) -> bool {
        self.enabled && self.active
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
