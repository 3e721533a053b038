//! Activity probes and the registry that aggregates them.
//!
//! A probe is a pluggable sensor that turns one kind of system measurement into
//! an active/inactive flag each cycle. The registry ORs the flags of every
//! enabled probe into the single signal the inactivity tracker consumes.

mod connections;
mod cpu;
mod input;
mod kick;
mod network;
mod processes;

pub use connections::ConnectionsProbe;
pub use cpu::CpuProbe;
pub use input::{InputProbe, PlatformIdleTime};
pub use kick::KickProbe;
pub use network::NetworkProbe;
pub use processes::ProcessProbe;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Networks, System};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::ProbeError;

/// Capability contract shared by every probe.
pub trait Probe: Send {
    /// Stable name, also the key of the probe's `plugins.<name>` section.
    fn name(&self) -> &str;

    /// Apply the `plugins` table. Returns false when the probe cannot be used;
    /// the probe is then left disabled.
    fn configure(&mut self, plugins: &toml::Table) -> bool;

    /// Re-measure and update the active flag. On error the previous flag is kept.
    fn sample(&mut self) -> Result<(), ProbeError>;

    /// Last sampled state. Always false while disabled.
    fn is_active(&self) -> bool;

    fn is_enabled(&self) -> bool;
}

/// Ordered set of probes.
#[derive(Default)]
pub struct ProbeRegistry {
    probes: Vec<Box<dyn Probe>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, probe: Box<dyn Probe>) {
        debug!(probe = probe.name(), enabled = probe.is_enabled(), "Probe registered");
        self.probes.push(probe);
    }

    /// Logical OR over all enabled probes. An empty registry is inactive.
    pub fn any_active(&self) -> bool {
        self.probes
            .iter()
            .any(|probe| probe.is_enabled() && probe.is_active())
    }

    pub fn all(&self) -> &[Box<dyn Probe>] {
        &self.probes
    }

    pub fn all_mut(&mut self) -> &mut [Box<dyn Probe>] {
        &mut self.probes
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }
}

/// Build every known probe, configure it from `plugins` and keep the usable ones.
///
/// `interval` is the scheduler cadence, used as the default window of the
/// input probe.
pub fn build_registry(plugins: &toml::Table, interval: Duration, clock: Arc<dyn Clock>) -> ProbeRegistry {
    let candidates: Vec<Box<dyn Probe>> = vec![
        Box::new(CpuProbe::new(Box::new(SysinfoStats::new()))),
        Box::new(ProcessProbe::new(Box::new(SysinfoStats::new()))),
        Box::new(NetworkProbe::new(Box::new(SysinfoStats::new()), clock)),
        Box::new(ConnectionsProbe::new(Box::new(SysinfoStats::new()))),
        Box::new(KickProbe::new()),
        Box::new(InputProbe::new(Box::new(PlatformIdleTime), interval)),
    ];

    let mut registry = ProbeRegistry::new();
    for mut probe in candidates {
        if probe.configure(plugins) {
            registry.add(probe);
        } else {
            debug!(probe = probe.name(), "Probe not configured, skipped");
        }
    }

    let enabled: Vec<&str> = registry
        .all()
        .iter()
        .filter(|p| p.is_enabled())
        .map(|p| p.name())
        .collect();
    info!("{} probe(s) registered, enabled: {:?}", registry.len(), enabled);

    registry
}

/// Byte counters summed over all non-loopback interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkTotals {
    pub received: u64,
    pub transmitted: u64,
}

/// Source of raw system measurements, so probe logic can run on injected readings.
pub trait SystemStats: Send {
    /// Utilization per logical core, in percent.
    fn cpu_usage(&mut self) -> Result<Vec<f32>, ProbeError>;

    /// Names of all running processes, one entry per process.
    fn process_names(&mut self) -> Result<Vec<String>, ProbeError>;

    fn network_totals(&mut self) -> Result<NetworkTotals, ProbeError>;

    /// Remote IPv4 addresses of established TCP connections.
    fn established_peers(&mut self) -> Result<Vec<Ipv4Addr>, ProbeError>;
}

/// `SystemStats` backed by sysinfo.
pub struct SysinfoStats {
    system: System,
    networks: Networks,
}

impl SysinfoStats {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; take the baseline now.
        system.refresh_cpu();
        Self {
            system,
            networks: Networks::new_with_refreshed_list(),
        }
    }
}

impl Default for SysinfoStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemStats for SysinfoStats {
    fn cpu_usage(&mut self) -> Result<Vec<f32>, ProbeError> {
        self.system.refresh_cpu();

        let usage: Vec<f32> = self.system.cpus().iter().map(|cpu| cpu.cpu_usage()).collect();
        if usage.is_empty() {
            return Err(ProbeError::Unavailable("no CPUs reported".to_string()));
        }
        Ok(usage)
    }

    fn process_names(&mut self) -> Result<Vec<String>, ProbeError> {
        self.system.refresh_processes();

        Ok(self
            .system
            .processes()
            .values()
            .map(|process| process.name().to_string())
            .collect())
    }

    fn network_totals(&mut self) -> Result<NetworkTotals, ProbeError> {
        self.networks.refresh();

        let mut totals = NetworkTotals::default();
        for (name, data) in &self.networks {
            if name == "lo" || name.starts_with("lo0") {
                continue;
            }
            totals.received += data.total_received();
            totals.transmitted += data.total_transmitted();
        }
        Ok(totals)
    }

    #[cfg(target_os = "linux")]
    fn established_peers(&mut self) -> Result<Vec<Ipv4Addr>, ProbeError> {
        let mut peers = connections::parse_proc_net_tcp(&std::fs::read_to_string("/proc/net/tcp")?);
        // tcp6 is absent when IPv6 is disabled.
        if let Ok(content) = std::fs::read_to_string("/proc/net/tcp6") {
            peers.extend(connections::parse_proc_net_tcp(&content));
        }
        Ok(peers)
    }

    #[cfg(not(target_os = "linux"))]
    fn established_peers(&mut self) -> Result<Vec<Ipv4Addr>, ProbeError> {
        Err(ProbeError::Unavailable(
            "connection table is only read on Linux".to_string(),
        ))
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::ScriptedProbe;
    use super::*;

    fn sampled(registry: &mut ProbeRegistry) {
        for probe in registry.all_mut() {
            let _ = probe.sample();
        }
    }

    #[test]
    fn test_empty_registry_is_inactive() {
        let registry = ProbeRegistry::new();
        assert_eq!(registry.len(), 0);
        assert!(!registry.any_active());
    }

    #[test]
    fn test_any_active_is_or_of_enabled_probes() {
        let mut registry = ProbeRegistry::new();
        registry.add(Box::new(ScriptedProbe::new("a", vec![false, true, false])));
        registry.add(Box::new(ScriptedProbe::new("b", vec![false, false, true])));

        let mut observed = Vec::new();
        for _ in 0..3 {
            sampled(&mut registry);
            observed.push(registry.any_active());
        }
        assert_eq!(observed, vec![false, true, true]);
    }

    #[test]
    fn test_disabled_probes_never_count() {
        let mut registry = ProbeRegistry::new();
        registry.add(Box::new(ScriptedProbe::new("off", vec![true]).disabled()));
        registry.add(Box::new(ScriptedProbe::fixed("idle", false)));
        sampled(&mut registry);

        assert_eq!(registry.len(), 2);
        assert!(!registry.any_active());
    }

    #[test]
    fn test_sample_error_keeps_last_value() {
        let mut probe =
            ScriptedProbe::with_results("flaky", vec![Ok(true), Err("gone".to_string())]);
        probe.sample().unwrap();
        assert!(probe.sample().is_err());
        assert!(probe.is_active());
    }

    #[test]
    fn test_first_cpu_reading_has_a_baseline() {
        let mut stats = SysinfoStats::new();
        let usage = stats.cpu_usage().unwrap();
        assert!(!usage.is_empty());
    }

    #[test]
    fn test_build_registry_without_plugins_has_no_enabled_probe() {
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::SystemClock);
        let registry = build_registry(&toml::Table::new(), Duration::from_secs(5), clock);

        assert!(registry.all().iter().all(|p| !p.is_enabled()));
        assert!(!registry.any_active());
    }
}
