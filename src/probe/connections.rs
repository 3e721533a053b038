//! Keeps the machine alive while a TCP connection to a watched network is open.
//!
//! Typical use is a remote shell: with `networks = ["192.168.1.0/24"]` an
//! ESTABLISHED connection whose peer is on the LAN counts as activity.

use serde::Deserialize;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::{debug, info, warn};

use super::{Probe, SystemStats};
use crate::config::decode_section;
use crate::error::ProbeError;

const SECTION: &str = "connections";

/// `st` column value of an established socket in `/proc/net/tcp`.
const TCP_ESTABLISHED: &str = "01";

/// IPv4 network in `a.b.c.d/prefix` notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Net {
    network: u32,
    prefix: u8,
}

impl Ipv4Net {
    pub fn parse(text: &str) -> Option<Self> {
        let (addr, prefix) = text.trim().split_once('/')?;
        let addr: Ipv4Addr = addr.trim().parse().ok()?;
        let prefix: u8 = prefix.trim().parse().ok()?;
        if prefix > 32 {
            return None;
        }
        Some(Self {
            network: u32::from(addr) & mask(prefix),
            prefix,
        })
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask(self.prefix) == self.network
    }
}

impl fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.network), self.prefix)
    }
}

fn mask(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        n => u32::MAX << (32 - u32::from(n)),
    }
}

/// Remote IPv4 addresses of ESTABLISHED sockets in a `/proc/net/tcp` or
/// `/proc/net/tcp6` table. IPv6 peers are kept only when IPv4-mapped.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub fn parse_proc_net_tcp(content: &str) -> Vec<Ipv4Addr> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let remote = fields.nth(2)?;
            let state = fields.next()?;
            if state != TCP_ESTABLISHED {
                return None;
            }
            let (addr, _port) = remote.split_once(':')?;
            parse_hex_addr(addr)
        })
        .collect()
}

/// The kernel prints each 32-bit word of the address in host byte order.
fn parse_hex_addr(hex: &str) -> Option<Ipv4Addr> {
    let word = |i: usize| -> Option<[u8; 4]> {
        let chunk = hex.get(i * 8..(i + 1) * 8)?;
        u32::from_str_radix(chunk, 16).ok().map(u32::to_ne_bytes)
    };

    match hex.len() {
        8 => word(0).map(Ipv4Addr::from),
        32 => {
            let mut bytes = [0u8; 16];
            for i in 0..4 {
                bytes[i * 4..(i + 1) * 4].copy_from_slice(&word(i)?);
            }
            Ipv6Addr::from(bytes).to_ipv4_mapped()
        }
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ConnectionsSection {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    networks: Vec<String>,
}

pub struct ConnectionsProbe {
    stats: Box<dyn SystemStats>,
    enabled: bool,
    active: bool,
    networks: Vec<Ipv4Net>,
}

impl ConnectionsProbe {
    pub fn new(stats: Box<dyn SystemStats>) -> Self {
        Self {
            stats,
            enabled: false,
            active: false,
            networks: Vec::new(),
        }
    }
}

impl Probe for ConnectionsProbe {
    fn name(&self) -> &str {
        SECTION
    }

    fn configure(&mut self, plugins: &toml::Table) -> bool {
        self.enabled = false;

        let section: ConnectionsSection = match decode_section(plugins, SECTION) {
            Ok(section) => section,
            Err(e) => {
                debug!("Connections probe disabled: {}", e);
                return false;
            }
        };

        if section.enabled != Some(true) {
            return true;
        }

        self.networks = section
            .networks
            .iter()
            .filter_map(|text| {
                let net = Ipv4Net::parse(text);
                if net.is_none() {
                    warn!("'{}' is not a network (expected a.b.c.d/prefix), ignored", text);
                }
                net
            })
            .collect();

        if self.networks.is_empty() {
            debug!("No valid network configured, probe disabled");
            return true;
        }

        if let Err(e) = self.stats.established_peers() {
            warn!("Connection table unavailable, probe disabled: {}", e);
            return false;
        }

        self.enabled = true;
        let networks: Vec<String> = self.networks.iter().map(Ipv4Net::to_string).collect();
        info!("connections probe config: networks={:?}", networks);
        true
    }

    fn sample(&mut self) -> Result<(), ProbeError> {
        if !self.enabled {
            return Ok(());
        }

        let peers = self.stats.established_peers()?;
        let matched = self
            .networks
            .iter()
            .find_map(|net| peers.iter().find(|peer| net.contains(**peer)).map(|peer| (net, peer)));

        match matched {
            Some((net, peer)) => {
                debug!(peer = %peer, network = %net, "Kept alive by connection");
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
