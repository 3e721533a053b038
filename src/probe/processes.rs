//! Keeps the machine alive while selected processes are running.

use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{Probe, SystemStats};
use crate::config::decode_section;
use crate::error::ProbeError;

const SECTION: &str = "processes";

#[derive(Debug, Deserialize)]
struct ProcessSection {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    names: Vec<String>,
    /// Minimum number of instances per name, default 1.
    #[serde(default)]
    min_counts: HashMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq)]
struct Watched {
    name: String,
    min_count: usize,
}

pub struct ProcessProbe {
    stats: Box<dyn SystemStats>,
    enabled: bool,
    active: bool,
    watched: Vec<Watched>,
}

impl ProcessProbe {
    pub fn new(stats: Box<dyn SystemStats>) -> Self {
        Self {
            stats,
            enabled: false,
            active: false,
            watched: Vec::new(),
        }
    }

    /// First watched process that reaches its instance count, if any.
    fn find_alive(&self, running: &[String]) -> Option<&Watched> {
        self.watched.iter().find(|watched| {
            running.iter().filter(|name| **name == watched.name).count() >= watched.min_count
        })
    }
}

impl Probe for ProcessProbe {
    fn name(&self) -> &str {
        SECTION
    }

    fn configure(&mut self, plugins: &toml::Table) -> bool {
        self.enabled = false;

        let section: ProcessSection = match decode_section(plugins, SECTION) {
            Ok(section) => section,
            Err(e) => {
                debug!("Process probe disabled: {}", e);
                return false;
            }
        };

        if section.enabled != Some(true) {
            return true;
        }

        self.watched = section
            .names
            .iter()
            .map(|name| {
                let name = name.trim();
                Watched {
                    name: name.to_string(),
                    min_count: section.min_counts.get(name).copied().unwrap_or(1).max(1),
                }
            })
            .filter(|watched| !watched.name.is_empty())
            .collect();

        if self.watched.is_empty() {
            debug!("No process names configured, probe disabled");
            return true;
        }

        self.enabled = true;
        info!("processes probe config: watching {:?}", self.watched);
        true
    }

    fn sample(&mut self) -> Result<(), ProbeError> {
        if !self.enabled {
            return Ok(());
        }

        let running = self.stats.process_names()?;
        match self.find_alive(&running) {
            Some(watched) => {
                debug!(process = %watched.name, "Kept alive by process");
                self.active = true;
            }
            None => self.active = false,
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.enabled && self.active
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::mocks::FakeStats;

    fn probe(running: &[&str], config: &str) -> ProcessProbe {
        let stats = FakeStats {
            processes: running.iter().map(|s| s.to_string()).collect(),
            ..FakeStats::default()
        };
        let mut probe = ProcessProbe::new(Box::new(stats));
        assert!(probe.configure(&config.parse().unwrap()));
        probe
    }

    #[test]
    fn test_running_process_keeps_alive() {
        let mut probe = probe(
            &["sshd", "rsync", "bash"],
            "[processes]\nenabled = true\nnames = [\"rsync\"]\n",
        );
        probe.sample().unwrap();
        assert!(probe.is_active());
    }

    #[test]
    fn test_min_count_must_be_reached() {
        let config = "[processes]\nenabled = true\nnames = [\"cc1\"]\n[processes.min_counts]\ncc1 = 3\n";

        let mut probe_two = probe(&["cc1", "cc1", "make"], config);
        probe_two.sample().unwrap();
        assert!(!probe_two.is_active());

        let mut probe_three = probe(&["cc1", "cc1", "cc1"], config);
        probe_three.sample().unwrap();
        assert!(probe_three.is_active());
    }

    #[test]
    fn test_min_count_applies_to_padded_name() {
        let config = "[processes]\nenabled = true\nnames = [\" cc1 \"]\n[processes.min_counts]\ncc1 = 2\n";

        let mut single = probe(&["cc1", "make"], config);
        single.sample().unwrap();
        assert!(!single.is_active());

        let mut pair = probe(&["cc1", "cc1"], config);
        pair.sample().unwrap();
        assert!(pair.is_active());
    }

    #[test]
    fn test_empty_names_disable_probe() {
        let probe = probe(&["anything"], "[processes]\nenabled = true\nnames = []\n");
        assert!(!probe.is_enabled());
    }
}
