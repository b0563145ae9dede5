//! Mapping of hyphenated RouterOS fields onto typed results
//!
//! Every query type has a fixed table of the device fields it reads; fields
//! outside the table are ignored (or, for VPN rows, kept as snake_case
//! extras).

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::routeros::Attributes;
use crate::util::{format_uptime, parse_uptime, usage_percent};

use super::types::*;

/// API command paths
pub mod path {
    pub const SYSTEM_RESOURCE: &str = "/system/resource/print";
    pub const WIRELESS_REGISTRATIONS: &str = "/interface/wireless/registration-table/print";
    pub const DHCP_LEASES: &str = "/ip/dhcp-server/lease/print";
    pub const CAPSMAN_REGISTRATIONS: &str = "/caps-man/registration-table/print";
    pub const INTERFACES: &str = "/interface/print";
    pub const ARP: &str = "/ip/arp/print";
    pub const ADDRESSES: &str = "/ip/address/print";
    pub const ROUTES: &str = "/ip/route/print";
    pub const FILES: &str = "/file/print";
    pub const BACKUP_SAVE: &str = "/system/backup/save";
    pub const BACKUP_LOAD: &str = "/system/backup/load";
    pub const IPSEC_PEERS: &str = "/ip/ipsec/active-peers/print";
    pub const IPSEC_POLICIES: &str = "/ip/ipsec/policy/print";
    pub const IPSEC_PROPOSALS: &str = "/ip/ipsec/proposal/print";
    pub const PPP_SECRETS: &str = "/ppp/secret/print";
    pub const CERTIFICATES: &str = "/certificate/print";
}

/// Per technology: active table, server table, default port.
pub const VPN_TABLES: [(VpnKind, &str, &str, u16); 4] = [
    (
        VpnKind::Pptp,
        "/interface/pptp-server/active/print",
        "/interface/pptp-server/server/print",
        1723,
    ),
    (
        VpnKind::L2tp,
        "/interface/l2tp-server/active/print",
        "/interface/l2tp-server/server/print",
        1701,
    ),
    (
        VpnKind::Sstp,
        "/interface/sstp-server/active/print",
        "/interface/sstp-server/server/print",
        443,
    ),
    (
        VpnKind::Ovpn,
        "/interface/ovpn-server/active/print",
        "/interface/ovpn-server/server/print",
        1194,
    ),
];

const DEFAULT_VPN_MTU: u32 = 1450;

/// Interface types reported when the caller does not choose.
pub const DEFAULT_INTERFACE_TYPES: [&str; 3] = ["ether", "wlan", "bridge"];

/// Lookup order for normalized VPN connection fields
const VPN_NAME_KEYS: &[&str] = &["name", "interface"];
const VPN_USER_KEYS: &[&str] = &["user", "username", "name"];
const VPN_ADDRESS_KEYS: &[&str] = &["address", "remote-address"];
const VPN_LOCAL_ADDRESS_KEYS: &[&str] = &["local-address"];
const VPN_UPTIME_KEYS: &[&str] = &["uptime", "established"];
const VPN_ENCODING_KEYS: &[&str] = &["encoding"];
const VPN_CIPHER_KEYS: &[&str] = &["cipher"];

struct Row<'a>(&'a Attributes);

impl Row<'_> {
    fn text(&self, key: &str) -> String {
        self.0.get(key).cloned().unwrap_or_default()
    }

    fn first_of(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.0.get(*k).cloned())
    }

    fn number<T: FromStr>(&self, key: &str, default: T) -> T {
        self.0
            .get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(|v| v == "true")
    }
}

pub fn system_metrics(row: &Attributes, model: Option<String>) -> SystemMetrics {
    let row = Row(row);

    let memory_total: u64 = row.number("total-memory", 0);
    let memory_free: u64 = row.number("free-memory", 0);
    let disk_total: u64 = row.number("total-hdd-space", 0);
    let disk_free: u64 = row.number("free-hdd-space", 0);
    let uptime_seconds = parse_uptime(&row.text("uptime"));

    SystemMetrics {
        cpu_load: row.number("cpu-load", 0.0),
        cpu_count: row.number("cpu-count", 1),
        memory_total,
        memory_free,
        memory_usage: usage_percent(memory_total as f64, memory_free as f64),
        disk_total,
        disk_free,
        disk_usage: usage_percent(disk_total as f64, disk_free as f64),
        uptime_seconds,
        uptime: format_uptime(uptime_seconds),
        version: row.text("version"),
        board: row.text("board-name"),
        architecture: row.text("architecture-name"),
        model,
    }
}

pub fn wireless_client(row: &Attributes) -> WirelessClient {
    let row = Row(row);
    WirelessClient {
        mac_address: row.text("mac-address"),
        interface: row.text("interface"),
        signal_strength: row.text("signal-strength"),
        uptime: row.text("uptime"),
        tx_rate: row.text("tx-rate"),
        rx_rate: row.text("rx-rate"),
    }
}

pub fn dhcp_lease(row: &Attributes) -> DhcpLease {
    let row = Row(row);
    DhcpLease {
        mac_address: row.text("mac-address"),
        address: row.text("address"),
        host_name: row.text("host-name"),
        status: row.text("status"),
        expires_after: row.text("expires-after"),
    }
}

pub fn capsman_client(row: &Attributes) -> CapsmanClient {
    let row = Row(row);
    CapsmanClient {
        mac_address: row.text("mac-address"),
        interface: row.text("interface"),
        ssid: row.text("ssid"),
        signal_strength: row.text("rx-signal"),
        uptime: row.text("uptime"),
        tx_rate: row.text("tx-rate"),
        rx_rate: row.text("rx-rate"),
    }
}

pub fn interface_traffic(row: &Attributes) -> InterfaceTraffic {
    let row = Row(row);
    InterfaceTraffic {
        name: row.text("name"),
        kind: row.text("type"),
        rx_bytes: row.number("rx-byte", 0),
        tx_bytes: row.number("tx-byte", 0),
        rx_packets: row.number("rx-packet", 0),
        tx_packets: row.number("tx-packet", 0),
        enabled: !row.flag("disabled"),
        running: row.flag("running"),
        comment: row.text("comment"),
        mtu: row.number("actual-mtu", 0),
    }
}

/// Whether an interface passes the name and type filters.
///
/// An empty type list disables type filtering.
pub fn interface_selected(iface: &InterfaceTraffic, name: Option<&str>, types: &[String]) -> bool {
    if let Some(name) = name {
        if iface.name != name {
            return false;
        }
    }
    types.is_empty() || types.iter().any(|t| *t == iface.kind)
}

pub fn vpn_connection(kind: VpnKind, row: &Attributes) -> VpnConnection {
    const NORMALIZED: &[&[&str]] = &[
        VPN_NAME_KEYS,
        VPN_USER_KEYS,
        VPN_ADDRESS_KEYS,
        VPN_LOCAL_ADDRESS_KEYS,
        VPN_UPTIME_KEYS,
        VPN_ENCODING_KEYS,
        VPN_CIPHER_KEYS,
    ];

    let extra = row
        .iter()
        .filter(|(key, _)| !key.starts_with('.'))
        .filter(|(key, _)| !NORMALIZED.iter().any(|keys| keys.contains(&key.as_str())))
        .map(|(key, value)| (snake_case(key), value.clone()))
        .collect::<BTreeMap<_, _>>();

    let row = Row(row);
    VpnConnection {
        kind,
        service: kind.service().to_string(),
        name: row.first_of(VPN_NAME_KEYS),
        user: row.first_of(VPN_USER_KEYS),
        address: row.first_of(VPN_ADDRESS_KEYS),
        local_address: row.first_of(VPN_LOCAL_ADDRESS_KEYS),
        uptime: row.first_of(VPN_UPTIME_KEYS),
        encoding: row.first_of(VPN_ENCODING_KEYS),
        cipher: row.first_of(VPN_CIPHER_KEYS),
        extra,
    }
}

pub fn vpn_server_config(kind: VpnKind, default_port: u16, row: &Attributes) -> VpnServerConfig {
    let row = Row(row);
    let enabled = row.flag("enabled");

    if kind == VpnKind::Ovpn {
        let mut authentication = vec!["certificate".to_string()];
        let auth = row.text("auth");
        if !auth.is_empty() {
            authentication.push(auth);
        }

        return VpnServerConfig {
            enabled,
            port: row.number("port", default_port),
            max_mtu: row.number("max-mtu", DEFAULT_VPN_MTU),
            max_mru: row.number("max-mru", DEFAULT_VPN_MTU),
            mode: Some(row.0.get("mode").cloned().unwrap_or_else(|| "ip".to_string())),
            authentication,
        };
    }

    VpnServerConfig {
        enabled,
        port: row.number("port", default_port),
        max_mtu: row.number("max-mtu", DEFAULT_VPN_MTU),
        max_mru: row.number("max-mru", DEFAULT_VPN_MTU),
        mode: None,
        authentication: split_list(&row.text("authentication")),
    }
}

pub fn ipsec_proposal(row: &Attributes) -> Option<IpsecProposal> {
    let row = Row(row);
    let name = row.0.get("name")?;
    let encryption = row.0.get("enc-algorithms")?;

    Some(IpsecProposal {
        name: name.clone(),
        encryption: encryption.clone(),
        hash: row.text("auth-algorithms"),
    })
}

pub fn ppp_user(row: &Attributes) -> PppUser {
    let row = Row(row);
    PppUser {
        name: row.text("name"),
        profile: row.text("profile"),
        service: row.text("service"),
        caller_id: row.text("caller-id"),
        remote_address: row.text("remote-address"),
        last_logged_out: row.0.get("last-logged-out").cloned(),
        disabled: row.flag("disabled"),
    }
}

/// Client certificate of an OpenVPN user. Certificates without a common
/// name and certificate authorities are not users.
pub fn certificate_user(row: &Attributes) -> Option<CertificateUser> {
    let row = Row(row);
    let common_name = row.0.get("common-name").filter(|cn| !cn.is_empty())?;
    let key_usage = row.text("key-usage");
    if key_usage.split(',').any(|usage| usage == "key-cert-sign") {
        return None;
    }

    Some(CertificateUser {
        name: row.text("name"),
        common_name: common_name.clone(),
        fingerprint: row.text("fingerprint"),
        valid_from: row.text("invalid-before"),
        valid_to: row.text("invalid-after"),
        expires_after: row.0.get("expires-after").cloned(),
        status: row.text("status"),
    })
}

pub fn file_info(row: &Attributes) -> BackupInfo {
    let row = Row(row);
    BackupInfo {
        filename: row.text("name"),
        size: parse_size(&row.text("size")),
        created: row.text("creation-time"),
    }
}

pub fn arp_entry(row: &Attributes) -> Option<ArpEntry> {
    let row = Row(row);
    let address = row.0.get("address")?.clone();
    Some(ArpEntry {
        address,
        mac_address: row.text("mac-address"),
        interface: row.text("interface"),
    })
}

pub fn address_entry(row: &Attributes) -> Option<AddressEntry> {
    let row = Row(row);
    let address = row.0.get("address")?.clone();
    Some(AddressEntry {
        address,
        interface: row.text("interface"),
    })
}

pub fn interface_entry(row: &Attributes) -> InterfaceEntry {
    let row = Row(row);
    InterfaceEntry {
        name: row.text("name"),
        kind: row.text("type"),
        max_l2mtu: row.0.get("max-l2mtu").and_then(|v| v.parse().ok()),
    }
}

pub fn route_entry(row: &Attributes) -> Option<RouteEntry> {
    let row = Row(row);
    let gateway = row.0.get("gateway")?.clone();
    Some(RouteEntry {
        dst_address: row.text("dst-address"),
        gateway,
    })
}

/// Comma separated list, trimmed, empties dropped.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn snake_case(key: &str) -> String {
    key.replace('-', "_")
}

/// File sizes come as plain bytes on v7 and as `12.5 KiB` on v6.
fn parse_size(value: &str) -> u64 {
    let value = value.trim();
    if let Ok(bytes) = value.parse() {
        return bytes;
    }

    let (number, unit) = value.split_once(' ').unwrap_or((value, ""));
    let Ok(number) = number.parse::<f64>() else {
        return 0;
    };

    let factor = match unit {
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };
    (number * factor) as u64
}
