//! Network discovery: CIDR scanning for device candidates and topology
//! inference from neighbor tables.

pub mod cidr;
pub mod scanner;
pub mod topology;

pub use cidr::Ipv4Cidr;
pub use scanner::{ProbeResult, ScanOptions, scan};
pub use topology::{EdgeSource, LinkType, TopologyEdge, discover_topology, infer_edges};

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("invalid IPv4 network: {0}")]
    InvalidCidr(String),

    #[error("{cidr} has {hosts} hosts, more than a single scan covers")]
    RangeTooLarge { cidr: String, hosts: u64 },

    #[error("no candidate ports given")]
    NoPorts,
}
