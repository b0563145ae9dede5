//! Device client
//!
//! Every operation opens its own [`Session`], runs one or more queries and
//! closes the session before returning, on success and on failure. Field
//! normalization lives in [`normalize`].

pub mod normalize;
pub mod types;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::Device;
use crate::config::ConnectionConfig;
use crate::routeros::{
    Attributes, DeviceError, DeviceResult, Endpoint, Session, SessionOptions, command_words,
};
use crate::security::{self, CredentialVault};

use normalize::path;
pub use types::*;

/// Seam used by the collector to poll device health.
#[async_trait]
pub trait SystemProbe: Send + Sync {
    async fn system_metrics(&self, device: &Device) -> SystemStatus;
}

/// Seam used by topology discovery.
#[async_trait]
pub trait NeighborSource: Send + Sync {
    async fn neighbor_tables(&self, device: &Device) -> DeviceResult<NeighborTables>;
}

/// Bounded, fixed-delay retry of the connection step.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Run `op`, retrying only failures to reach the device.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> DeviceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DeviceResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_connection_failure() && attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "connection attempt {attempt}/{} failed: {e}, retrying in {:?}",
                        self.retries + 1,
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceClient {
    options: SessionOptions,
    retry: RetryPolicy,
    backup_wait: Duration,
    restore_wait: Duration,
    vault: Option<CredentialVault>,
}

impl DeviceClient {
    pub fn new(config: &ConnectionConfig, vault: Option<CredentialVault>) -> Self {
        Self {
            options: SessionOptions {
                connect_timeout: Duration::from_secs(config.timeout),
                command_timeout: Duration::from_secs(config.command_timeout),
            },
            retry: RetryPolicy {
                retries: config.retries,
                delay: Duration::from_secs(config.retry_delay),
            },
            backup_wait: Duration::from_secs(config.backup_wait),
            restore_wait: Duration::from_secs(config.restore_wait),
            vault,
        }
    }

    pub fn with_session_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Open an authenticated session. Tagged passwords are decrypted here
    /// and the plaintext does not outlive the call.
    async fn open(&self, device: &Device) -> DeviceResult<Session> {
        let password = security::reveal(self.vault.as_ref(), &device.password)?;
        let endpoint = Endpoint {
            address: device.address.clone(),
            port: device.api_port,
            use_tls: device.use_tls,
        };
        Session::connect(&endpoint, &device.username, &password, self.options).await
    }

    async fn open_with_retry(&self, device: &Device) -> DeviceResult<Session> {
        self.retry.run(|| self.open(device)).await
    }

    /// Health snapshot. Never fails; unreachable devices report `Offline`.
    #[instrument(skip(self, device), fields(device = %device.name))]
    pub async fn get_system_metrics(&self, device: &Device) -> SystemStatus {
        let mut session = match self.open(device).await {
            Ok(session) => session,
            Err(e) => return status_from_error(e),
        };

        let result = session.query(path::SYSTEM_RESOURCE).await;
        session.close().await;

        match result {
            Ok(rows) => match rows.first() {
                Some(row) => SystemStatus::Online(normalize::system_metrics(row, device.model.clone())),
                None => SystemStatus::Error {
                    message: "empty system resource reply".to_string(),
                },
            },
            Err(e) => status_from_error(e),
        }
    }

    /// Wireless, DHCP and CAPsMAN clients. A failing source contributes an
    /// empty list and is named in `failed_sources`.
    #[instrument(skip(self, device), fields(device = %device.name))]
    pub async fn get_connected_clients(&self, device: &Device) -> DeviceResult<ConnectedClients> {
        let mut session = self.open(device).await?;
        let mut clients = ConnectedClients::default();

        match session.query(path::WIRELESS_REGISTRATIONS).await {
            Ok(rows) => clients.wireless = rows.iter().map(normalize::wireless_client).collect(),
            Err(e) => source_failed(&mut clients.failed_sources, "wireless", e),
        }

        match session.query(path::DHCP_LEASES).await {
            Ok(rows) => clients.dhcp = rows.iter().map(normalize::dhcp_lease).collect(),
            Err(e) => source_failed(&mut clients.failed_sources, "dhcp", e),
        }

        match session.query(path::CAPSMAN_REGISTRATIONS).await {
            Ok(rows) => clients.capsman = rows.iter().map(normalize::capsman_client).collect(),
            Err(e) => source_failed(&mut clients.failed_sources, "capsman", e),
        }

        session.close().await;

        clients.total = clients.wireless.len() + clients.dhcp.len() + clients.capsman.len();
        debug!("found {} clients", clients.total);
        Ok(clients)
    }

    /// Interface counters filtered by name and type.
    ///
    /// `types` defaults to ether, wlan and bridge; an empty list disables
    /// type filtering.
    #[instrument(skip(self, device), fields(device = %device.name))]
    pub async fn get_interface_traffic(
        &self,
        device: &Device,
        name: Option<&str>,
        types: Option<&[String]>,
    ) -> DeviceResult<Vec<InterfaceTraffic>> {
        let default_types: Vec<String>;
        let types = match types {
            Some(types) => types,
            None => {
                default_types = normalize::DEFAULT_INTERFACE_TYPES
                    .iter()
                    .map(|t| t.to_string())
                    .collect();
                &default_types
            }
        };

        let mut session = self.open(device).await?;
        let result = session.query(path::INTERFACES).await;
        session.close().await;

        Ok(result?
            .iter()
            .map(normalize::interface_traffic)
            .filter(|iface| normalize::interface_selected(iface, name, types))
            .collect())
    }

    /// Run an operator command and return the raw rows.
    #[instrument(skip(self, device), fields(device = %device.name))]
    pub async fn send_raw_command(
        &self,
        device: &Device,
        command: &str,
    ) -> DeviceResult<Vec<Attributes>> {
        let words = command_words(command)?;

        let mut session = self.open(device).await?;
        let result = session.run(&words).await;
        session.close().await;
        result
    }

    /// Save a configuration backup and confirm the file exists.
    ///
    /// Only the connection step is retried.
    #[instrument(skip(self, device), fields(device = %device.name))]
    pub async fn backup_configuration(&self, device: &Device) -> DeviceResult<BackupInfo> {
        let name = backup_name(&device.name, Utc::now());

        let mut session = self.open_with_retry(device).await?;
        let result = self.save_backup(&mut session, &name).await;
        session.close().await;

        if let Ok(info) = &result {
            debug!("backup {} created ({} bytes)", info.filename, info.size);
        }
        result
    }

    async fn save_backup(&self, session: &mut Session, name: &str) -> DeviceResult<BackupInfo> {
        session
            .run(&[path::BACKUP_SAVE.to_string(), format!("=name={name}")])
            .await?;

        tokio::time::sleep(self.backup_wait).await;

        let filename = format!("{name}.backup");
        find_file(session, &filename)
            .await?
            .ok_or_else(|| DeviceError::NotFound(format!("backup file {filename} was not created")))
    }

    /// Load a backup file that already exists on the device.
    #[instrument(skip(self, device), fields(device = %device.name))]
    pub async fn restore_configuration(
        &self,
        device: &Device,
        filename: &str,
    ) -> DeviceResult<RestoreOutcome> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(DeviceError::InvalidInput("empty backup file name".to_string()));
        }

        let mut session = self.open_with_retry(device).await?;
        let result = self.load_backup(&mut session, filename).await;
        session.close().await;
        result
    }

    async fn load_backup(&self, session: &mut Session, filename: &str) -> DeviceResult<RestoreOutcome> {
        if find_file(session, filename).await?.is_none() {
            return Err(DeviceError::NotFound(format!("backup file {filename}")));
        }

        let stem = filename.strip_suffix(".backup").unwrap_or(filename);
        session
            .run(&[path::BACKUP_LOAD.to_string(), format!("=name={stem}")])
            .await?;

        tokio::time::sleep(self.restore_wait).await;

        Ok(RestoreOutcome {
            filename: filename.to_string(),
            message: "Configuration restored. Device may reboot.".to_string(),
        })
    }

    /// Active tunnels and server settings of every VPN technology.
    ///
    /// Technologies the device does not have contribute nothing.
    #[instrument(skip(self, device), fields(device = %device.name))]
    pub async fn get_vpn_status(&self, device: &Device) -> DeviceResult<VpnStatus> {
        let mut session = self.open(device).await?;
        let status = read_vpn_status(&mut session).await;
        session.close().await;
        Ok(status)
    }

    /// PPP accounts and OpenVPN certificate users configured on the device.
    #[instrument(skip(self, device), fields(device = %device.name))]
    pub async fn get_vpn_users(&self, device: &Device) -> DeviceResult<VpnUsers> {
        let mut session = self.open(device).await?;
        let mut users = VpnUsers::default();

        match session.query(path::PPP_SECRETS).await {
            Ok(rows) => users.ppp_users = rows.iter().map(normalize::ppp_user).collect(),
            Err(e) => source_failed(&mut users.failed_sources, "ppp-secrets", e),
        }
        match session.query(path::CERTIFICATES).await {
            Ok(rows) => {
                users.ovpn_users = rows.iter().filter_map(normalize::certificate_user).collect()
            }
            Err(e) => source_failed(&mut users.failed_sources, "certificates", e),
        }

        session.close().await;
        debug!(
            "{} PPP users, {} certificate users",
            users.ppp_users.len(),
            users.ovpn_users.len()
        );
        Ok(users)
    }
}

async fn read_vpn_status(session: &mut Session) -> VpnStatus {
    let mut failed = Vec::new();
    let mut connections = Vec::new();
    let mut servers = std::collections::BTreeMap::new();

    for (kind, active_path, server_path, default_port) in normalize::VPN_TABLES {
        match session.query(active_path).await {
            Ok(rows) => connections.extend(rows.iter().map(|r| normalize::vpn_connection(kind, r))),
            Err(e) => source_failed(&mut failed, &format!("{}-active", kind.service()), e),
        }

        let config = match session.query(server_path).await {
            Ok(rows) => rows
                .first()
                .map(|row| normalize::vpn_server_config(kind, default_port, row))
                .unwrap_or_else(VpnServerConfig::disabled),
            Err(e) => {
                source_failed(&mut failed, &format!("{}-server", kind.service()), e);
                VpnServerConfig::disabled()
            }
        };
        servers.insert(kind, config);
    }

    match session.query(path::IPSEC_PEERS).await {
        Ok(rows) => connections.extend(
            rows.iter()
                .map(|r| normalize::vpn_connection(VpnKind::Ipsec, r)),
        ),
        Err(e) => source_failed(&mut failed, "IPsec-peers", e),
    }

    let mut ipsec = IpsecConfig::default();
    match session.query(path::IPSEC_POLICIES).await {
        Ok(policies) => {
            ipsec.enabled = !policies.is_empty();
            ipsec.policy_count = policies.len();
        }
        Err(e) => source_failed(&mut failed, "IPsec-policies", e),
    }
    match session.query(path::IPSEC_PROPOSALS).await {
        Ok(rows) => ipsec.proposals = rows.iter().filter_map(normalize::ipsec_proposal).collect(),
        Err(e) => source_failed(&mut failed, "IPsec-proposals", e),
    }

    let connections_by_type = VpnKind::ALL
        .iter()
        .map(|kind| (*kind, connections.iter().filter(|c| c.kind == *kind).count()))
        .collect();

    VpnStatus {
        total_connections: connections.len(),
        connections_by_type,
        active_connections: connections,
        servers,
        ipsec,
        failed_sources: failed,
    }
}

async fn find_file(session: &mut Session, filename: &str) -> DeviceResult<Option<BackupInfo>> {
    let files = session.query(path::FILES).await?;
    Ok(files
        .iter()
        .map(normalize::file_info)
        .find(|file| file.filename == filename))
}

fn source_failed(failed: &mut Vec<String>, source: &str, err: DeviceError) {
    warn!("{source} query failed: {err}");
    failed.push(source.to_string());
}

fn status_from_error(err: DeviceError) -> SystemStatus {
    match err {
        DeviceError::Offline { .. } | DeviceError::Timeout(_) | DeviceError::AuthFailure(_) => {
            SystemStatus::Offline {
                reason: err.to_string(),
            }
        }
        _ => SystemStatus::Error {
            message: err.to_string(),
        },
    }
}

/// `backup_<device>_<YYYYmmdd_HHMMSS>` with the device name reduced to
/// characters safe in a file name.
pub fn backup_name(device_name: &str, at: DateTime<Utc>) -> String {
    let safe: String = device_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("backup_{safe}_{}", at.format("%Y%m%d_%H%M%S"))
}

#[async_trait]
impl SystemProbe for DeviceClient {
    async fn system_metrics(&self, device: &Device) -> SystemStatus {
        self.get_system_metrics(device).await
    }
}

#[async_trait]
impl NeighborSource for DeviceClient {
    #[instrument(skip(self, device), fields(device = %device.name))]
    async fn neighbor_tables(&self, device: &Device) -> DeviceResult<NeighborTables> {
        let mut session = self.open(device).await?;
        let result = read_neighbor_tables(&mut session).await;
        session.close().await;
        result
    }
}

async fn read_neighbor_tables(session: &mut Session) -> DeviceResult<NeighborTables> {
    let arp = session.query(path::ARP).await?;
    let addresses = session.query(path::ADDRESSES).await?;
    let interfaces = session.query(path::INTERFACES).await?;
    let routes = session.query(path::ROUTES).await?;

    Ok(NeighborTables {
        arp: arp.iter().filter_map(normalize::arp_entry).collect(),
        addresses: addresses.iter().filter_map(normalize::address_entry).collect(),
        interfaces: interfaces.iter().map(normalize::interface_entry).collect(),
        routes: routes.iter().filter_map(normalize::route_entry).collect(),
    })
}
