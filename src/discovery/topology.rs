use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::Ipv4Cidr;
use crate::device::{InterfaceEntry, NeighborSource, NeighborTables};
use crate::{Device, DeviceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Ethernet,
    Wireless,
    Vpn,
    Wan,
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkType::Ethernet => "ethernet",
            LinkType::Wireless => "wireless",
            LinkType::Vpn => "vpn",
            LinkType::Wan => "wan",
        };
        f.write_str(name)
    }
}

/// Which table an edge was inferred from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeSource {
    Arp,
    Route,
}

/// An inferred adjacency between two managed devices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologyEdge {
    pub source_device: DeviceId,
    pub target_device: DeviceId,
    pub source_interface: String,
    /// Filled in when the target also sees the source in its ARP table
    pub target_interface: Option<String>,
    pub link_type: LinkType,
    pub bandwidth_mbps: u32,
    pub discovered_via: EdgeSource,
}

impl TopologyEdge {
    fn connects(&self, a: DeviceId, b: DeviceId) -> bool {
        (self.source_device == a && self.target_device == b)
            || (self.source_device == b && self.target_device == a)
    }
}

/// Classify a link by the local interface it was seen on.
pub fn classify_link(interface: &str, kind: Option<&str>) -> LinkType {
    let name = interface.to_lowercase();
    let kind = kind.unwrap_or_default().to_lowercase();

    if matches!(kind.as_str(), "wlan" | "wireless" | "wifi") || name.contains("wlan") {
        LinkType::Wireless
    } else if matches!(
        kind.as_str(),
        "pppoe-client" | "pptp-client" | "l2tp-client" | "ovpn-client"
    ) || ["vpn", "tunnel", "ipsec"].iter().any(|k| name.contains(k))
    {
        LinkType::Vpn
    } else if name.contains("wan") || name.contains("internet") {
        LinkType::Wan
    } else {
        LinkType::Ethernet
    }
}

/// Bandwidth estimate in Mbps from the interface's maximum L2 MTU.
pub fn estimate_bandwidth(max_l2mtu: Option<u32>) -> u32 {
    match max_l2mtu {
        Some(mtu) if mtu >= 9000 => 1000,
        Some(mtu) if mtu >= 1500 => 100,
        Some(_) => 10,
        None => 100,
    }
}

/// Index of management addresses to device ids.
///
/// Only the address a device is managed at identifies it; addresses read
/// from its interfaces do not.
fn address_index(devices: &[Device]) -> HashMap<Ipv4Addr, DeviceId> {
    devices
        .iter()
        .filter_map(|device| Some((device.address.parse::<Ipv4Addr>().ok()?, device.id)))
        .collect()
}

fn find_interface<'a>(tables: &'a NeighborTables, name: &str) -> Option<&'a InterfaceEntry> {
    tables.interfaces.iter().find(|i| i.name == name)
}

/// Local interface whose subnet contains `gateway`.
fn interface_towards(tables: &NeighborTables, gateway: Ipv4Addr) -> Option<String> {
    tables
        .addresses
        .iter()
        .find(|entry| {
            entry
                .address
                .parse::<Ipv4Cidr>()
                .is_ok_and(|cidr| cidr.contains(gateway))
        })
        .map(|entry| entry.interface.clone())
}

fn push_edge(
    edges: &mut Vec<TopologyEdge>,
    tables: &NeighborTables,
    source: DeviceId,
    target: DeviceId,
    interface: &str,
    via: EdgeSource,
) {
    if let Some(existing) = edges.iter_mut().find(|e| e.connects(source, target)) {
        if existing.target_device == source && existing.target_interface.is_none() && via == EdgeSource::Arp {
            existing.target_interface = Some(interface.to_string());
        }
        return;
    }

    let entry = find_interface(tables, interface);
    edges.push(TopologyEdge {
        source_device: source,
        target_device: target,
        source_interface: interface.to_string(),
        target_interface: None,
        link_type: classify_link(interface, entry.map(|e| e.kind.as_str())),
        bandwidth_mbps: estimate_bandwidth(entry.and_then(|e| e.max_l2mtu)),
        discovered_via: via,
    });
}

/// Infer edges from the neighbor tables of each reachable device.
///
/// An ARP entry or route gateway that belongs to a different known device
/// yields one edge per device pair, whichever direction was seen first.
pub fn infer_edges(devices: &[Device], observed: &[(DeviceId, NeighborTables)]) -> Vec<TopologyEdge> {
    let index = address_index(devices);
    let mut edges = Vec::new();

    for (source, tables) in observed {
        for arp in &tables.arp {
            let Ok(address) = arp.address.parse::<Ipv4Addr>() else {
                continue;
            };
            match index.get(&address) {
                Some(&target) if target != *source => {
                    push_edge(&mut edges, tables, *source, target, &arp.interface, EdgeSource::Arp);
                }
                _ => {}
            }
        }

        for route in &tables.routes {
            let gateway = route.gateway.split('%').next().unwrap_or_default();
            let Ok(gateway) = gateway.parse::<Ipv4Addr>() else {
                continue;
            };
            let Some(&target) = index.get(&gateway) else {
                continue;
            };
            if target == *source {
                continue;
            }
            let interface = interface_towards(tables, gateway).unwrap_or_else(|| "unknown".to_string());
            push_edge(&mut edges, tables, *source, target, &interface, EdgeSource::Route);
        }
    }

    edges
}

/// Read neighbor tables from every device and infer the edges between
/// them. Unreachable devices are skipped.
#[instrument(skip_all, fields(devices = devices.len()))]
pub async fn discover_topology(source: &dyn NeighborSource, devices: &[Device]) -> Vec<TopologyEdge> {
    let mut observed = Vec::with_capacity(devices.len());

    for device in devices {
        match source.neighbor_tables(device).await {
            Ok(tables) => {
                debug!(
                    "{}: {} arp entries, {} routes",
                    device.name,
                    tables.arp.len(),
                    tables.routes.len()
                );
                observed.push((device.id, tables));
            }
            Err(e) => warn!("skipping {} for topology: {e}", device.display()),
        }
    }

    let edges = infer_edges(devices, &observed);
    debug!("inferred {} edges", edges.len());
    edges
}
