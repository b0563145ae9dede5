use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, trace, warn};

use super::{DiscoveryError, Ipv4Cidr, cidr::MAX_SCAN_HOSTS};
use crate::config::DiscoveryConfig;

/// Upper bound for one reverse hostname lookup.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);

static MAC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[0-9A-Fa-f]{12}$").expect("valid regex"));

/// A responding address with at least one open candidate port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub address: Ipv4Addr,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub open_ports: Vec<u16>,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub ports: Vec<u16>,
    pub concurrency: usize,
    pub probe_timeout: Duration,
    /// Resolve hostnames and MAC addresses of responding hosts
    pub enrich: bool,
}

impl From<&DiscoveryConfig> for ScanOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            ports: config.ports.clone(),
            concurrency: config.concurrency,
            probe_timeout: Duration::from_millis(config.probe_timeout),
            enrich: true,
        }
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from(&DiscoveryConfig::default())
    }
}

/// Liveness of a single port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortState {
    Open,
    /// The host answered with a reset
    Refused,
    Silent,
}

/// Probe every host of `cidr` on the candidate ports.
///
/// The range is validated before any connection is attempted. At most
/// `concurrency` hosts are probed at once. Results are ordered by address.
#[instrument(skip(options), fields(ports = ?options.ports, concurrency = options.concurrency))]
pub async fn scan(cidr: &str, options: &ScanOptions) -> Result<Vec<ProbeResult>, DiscoveryError> {
    let cidr: Ipv4Cidr = cidr.parse()?;

    if cidr.host_count() > MAX_SCAN_HOSTS {
        return Err(DiscoveryError::RangeTooLarge {
            cidr: cidr.to_string(),
            hosts: cidr.host_count(),
        });
    }
    if options.ports.is_empty() {
        return Err(DiscoveryError::NoPorts);
    }

    debug!("scanning {} hosts in {cidr}", cidr.host_count());

    // Read once up front; every responding host is looked up in it
    let arp_table = if options.enrich {
        tokio::fs::read_to_string("/proc/net/arp").await.ok()
    } else {
        None
    };
    let arp_table = Arc::new(arp_table);

    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let ports = Arc::new(options.ports.clone());
    let mut handles = Vec::new();

    for address in cidr.hosts() {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let ports = ports.clone();
        let arp_table = arp_table.clone();
        let timeout = options.probe_timeout;
        let enrich = options.enrich;

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let (address, open_ports) = probe_host(address, &ports, timeout).await?;

            let mut result = ProbeResult {
                address,
                hostname: None,
                mac_address: None,
                open_ports,
            };
            if enrich {
                result.hostname = tokio::time::timeout(RESOLVE_TIMEOUT, resolve_hostname(address))
                    .await
                    .unwrap_or_else(|_| {
                        debug!("hostname lookup for {address} timed out");
                        None
                    });
                result.mac_address = arp_table
                    .as_deref()
                    .and_then(|table| mac_from_arp_table(table, address));
            }
            Some(result)
        }));
    }

    let mut found = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Some(result)) => found.push(result),
            Ok(None) => {}
            Err(e) => warn!("probe task failed: {e}"),
        }
    }

    found.sort_by_key(|r| r.address);
    debug!("found {} candidates in {cidr}", found.len());
    Ok(found)
}

/// Returns the open ports of a responding host, or `None` when the host
/// did not respond or has no open candidate port.
async fn probe_host(address: Ipv4Addr, ports: &[u16], timeout: Duration) -> Option<(Ipv4Addr, Vec<u16>)> {
    let mut reachable = false;
    let mut open_ports = Vec::new();

    for &port in ports {
        match probe_port(address, port, timeout).await {
            PortState::Open => {
                reachable = true;
                open_ports.push(port);
            }
            PortState::Refused => reachable = true,
            PortState::Silent => {}
        }
    }

    if !reachable {
        return None;
    }
    if open_ports.is_empty() {
        trace!("{address} responded without open candidate ports");
        return None;
    }
    Some((address, open_ports))
}

async fn probe_port(address: Ipv4Addr, port: u16, timeout: Duration) -> PortState {
    let target = SocketAddr::from((address, port));
    match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(_stream)) => PortState::Open,
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => PortState::Refused,
        _ => PortState::Silent,
    }
}

/// Reverse lookup through the system resolver.
async fn resolve_hostname(address: Ipv4Addr) -> Option<String> {
    let output = Command::new("getent")
        .args(["hosts", &address.to_string()])
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
}

/// Look up `address` in the kernel ARP table text.
fn mac_from_arp_table(table: &str, address: Ipv4Addr) -> Option<String> {
    let address = address.to_string();
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            (fields.len() >= 4 && fields[0] == address).then(|| fields[3])
        })
        .find_map(normalize_mac)
}

/// Canonical `AA:BB:CC:DD:EE:FF` form of a MAC in colon, dash or dotted
/// notation. The all-zero address of incomplete ARP entries is rejected.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let hex: String = raw.chars().filter(|c| !matches!(c, ':' | '-' | '.')).collect();

    if !MAC_RE.is_match(&hex) || hex.chars().all(|c| c == '0') {
        return None;
    }

    let hex = hex.to_uppercase();
    let pairs: Vec<&str> = (0..6).map(|i| &hex[i * 2..i * 2 + 2]).collect();
    Some(pairs.join(":"))
}
