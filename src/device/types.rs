//! Typed results of device queries

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{DeviceId, MetricCategory, MetricSample};

/// Health snapshot read from `/system/resource`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub cpu_load: f64,
    pub cpu_count: u32,
    pub memory_total: u64,
    pub memory_free: u64,
    /// Percentage in [0, 100]
    pub memory_usage: f64,
    pub disk_total: u64,
    pub disk_free: u64,
    /// Percentage in [0, 100]
    pub disk_usage: f64,
    pub uptime_seconds: u64,
    pub uptime: String,
    pub version: String,
    pub board: String,
    pub architecture: String,
    pub model: Option<String>,
}

impl SystemMetrics {
    /// Flatten into samples that all share `timestamp`.
    pub fn samples(&self, device_id: DeviceId, timestamp: DateTime<Utc>) -> Vec<MetricSample> {
        let sample = |category, name: &str, value: f64| {
            MetricSample::new(device_id, category, name, value, timestamp)
        };

        vec![
            sample(MetricCategory::Cpu, "load", self.cpu_load),
            sample(MetricCategory::Cpu, "count", self.cpu_count as f64),
            sample(MetricCategory::Memory, "usage", self.memory_usage),
            sample(MetricCategory::Memory, "total", self.memory_total as f64),
            sample(MetricCategory::Memory, "free", self.memory_free as f64),
            sample(MetricCategory::Disk, "usage", self.disk_usage),
            sample(MetricCategory::Disk, "total", self.disk_total as f64),
            sample(MetricCategory::Disk, "free", self.disk_free as f64),
            sample(MetricCategory::System, "uptime", self.uptime_seconds as f64),
        ]
    }
}

/// Outcome of a health poll. Polling never fails, it reports.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SystemStatus {
    Online(SystemMetrics),
    /// The device could not be reached or refused the login
    Offline { reason: String },
    /// The device answered but the answer was unusable
    Error { message: String },
}

impl SystemStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, SystemStatus::Online(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WirelessClient {
    pub mac_address: String,
    pub interface: String,
    pub signal_strength: String,
    pub uptime: String,
    pub tx_rate: String,
    pub rx_rate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DhcpLease {
    pub mac_address: String,
    pub address: String,
    pub host_name: String,
    pub status: String,
    pub expires_after: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapsmanClient {
    pub mac_address: String,
    pub interface: String,
    pub ssid: String,
    pub signal_strength: String,
    pub uptime: String,
    pub tx_rate: String,
    pub rx_rate: String,
}

/// Client lists from the three registration sources.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectedClients {
    pub wireless: Vec<WirelessClient>,
    pub dhcp: Vec<DhcpLease>,
    pub capsman: Vec<CapsmanClient>,
    pub total: usize,
    /// Sources whose query failed and contributed an empty list
    pub failed_sources: Vec<String>,
}

impl ConnectedClients {
    pub fn is_partial(&self) -> bool {
        !self.failed_sources.is_empty()
    }

    /// Turn a partial result into an error for callers that need all sources.
    pub fn ensure_complete(self) -> crate::routeros::DeviceResult<Self> {
        if self.is_partial() {
            return Err(crate::routeros::DeviceError::PartialResult(
                self.failed_sources,
            ));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceTraffic {
    pub name: String,
    pub kind: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub enabled: bool,
    pub running: bool,
    pub comment: String,
    pub mtu: u32,
}

/// VPN technologies with an active-connection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnKind {
    Pptp,
    L2tp,
    Sstp,
    Ovpn,
    Ipsec,
}

impl VpnKind {
    pub const ALL: [VpnKind; 5] = [
        VpnKind::Pptp,
        VpnKind::L2tp,
        VpnKind::Sstp,
        VpnKind::Ovpn,
        VpnKind::Ipsec,
    ];

    pub fn service(&self) -> &'static str {
        match self {
            VpnKind::Pptp => "PPTP",
            VpnKind::L2tp => "L2TP",
            VpnKind::Sstp => "SSTP",
            VpnKind::Ovpn => "OpenVPN",
            VpnKind::Ipsec => "IPsec",
        }
    }
}

/// One active tunnel, normalized across technologies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VpnConnection {
    pub kind: VpnKind,
    pub service: String,
    pub name: Option<String>,
    pub user: Option<String>,
    pub address: Option<String>,
    pub local_address: Option<String>,
    pub uptime: Option<String>,
    pub encoding: Option<String>,
    pub cipher: Option<String>,
    /// Remaining device fields with snake_case keys
    pub extra: BTreeMap<String, String>,
}

/// Server settings of a PPP style VPN technology.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VpnServerConfig {
    pub enabled: bool,
    pub port: u16,
    pub max_mtu: u32,
    pub max_mru: u32,
    /// OpenVPN only
    pub mode: Option<String>,
    pub authentication: Vec<String>,
}

impl VpnServerConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            port: 0,
            max_mtu: 0,
            max_mru: 0,
            mode: None,
            authentication: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IpsecProposal {
    pub name: String,
    pub encryption: String,
    pub hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IpsecConfig {
    pub enabled: bool,
    pub policy_count: usize,
    pub proposals: Vec<IpsecProposal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VpnStatus {
    pub total_connections: usize,
    pub connections_by_type: BTreeMap<VpnKind, usize>,
    pub active_connections: Vec<VpnConnection>,
    pub servers: BTreeMap<VpnKind, VpnServerConfig>,
    pub ipsec: IpsecConfig,
    /// Tables that could not be read
    pub failed_sources: Vec<String>,
}

/// A PPP account (`/ppp/secret`), usable by any PPP based VPN service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PppUser {
    pub name: String,
    pub profile: String,
    /// `any`, `pptp`, `l2tp`, `sstp`, `ovpn`, ...
    pub service: String,
    pub caller_id: String,
    pub remote_address: String,
    pub last_logged_out: Option<String>,
    pub disabled: bool,
}

/// An OpenVPN client known by its certificate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificateUser {
    pub name: String,
    pub common_name: String,
    pub fingerprint: String,
    pub valid_from: String,
    pub valid_to: String,
    pub expires_after: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VpnUsers {
    pub ppp_users: Vec<PppUser>,
    pub ovpn_users: Vec<CertificateUser>,
    /// Tables that could not be read
    pub failed_sources: Vec<String>,
}

/// A backup file confirmed on the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupInfo {
    pub filename: String,
    pub size: u64,
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreOutcome {
    pub filename: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArpEntry {
    pub address: String,
    pub mac_address: String,
    pub interface: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressEntry {
    /// CIDR notation, e.g. `10.0.0.1/24`
    pub address: String,
    pub interface: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceEntry {
    pub name: String,
    pub kind: String,
    pub max_l2mtu: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteEntry {
    pub dst_address: String,
    pub gateway: String,
}

/// Layer 2/3 neighbor information used for topology inference.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NeighborTables {
    pub arp: Vec<ArpEntry>,
    pub addresses: Vec<AddressEntry>,
    pub interfaces: Vec<InterfaceEntry>,
    pub routes: Vec<RouteEntry>,
}
