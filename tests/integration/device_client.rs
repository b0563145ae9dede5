//! Device client against a scripted router
//!
//! - Sessions log in, run their queries and always say /quit
//! - Bad credentials and dead ports degrade to Offline, never to a panic
//! - Partial sources are reported, not fatal

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tikmon::device::{SystemStatus, VpnKind};
use tikmon::routeros::DeviceError;
use tikmon::security::CredentialVault;
use tikmon::{Secret, config::ConnectionConfig, device::DeviceClient};

use crate::helpers::*;

#[tokio::test]
async fn test_system_metrics_from_router() {
    let router = MockRouter::start(RouterScript::healthy(42)).await;
    let device = router.device(1, "core-1");

    let status = test_client().get_system_metrics(&device).await;

    let SystemStatus::Online(metrics) = status else {
        panic!("expected online status, got {status:?}");
    };
    assert_eq!(metrics.cpu_load, 42.0);
    assert_eq!(metrics.cpu_count, 2);
    assert_eq!(metrics.memory_usage, 25.0);
    assert_eq!(metrics.disk_usage, 25.0);
    assert_eq!(metrics.uptime_seconds, 788_645);
    assert_eq!(metrics.board, "RB5009UG+S+");
    assert_eq!(metrics.model.as_deref(), Some("RB5009"));

    assert_eq!(router.logins(), 1);
    assert_eq!(router.quits(), 1);
}

#[tokio::test]
async fn test_wrong_password_is_offline() {
    let router = MockRouter::start(RouterScript::healthy(10)).await;
    let mut device = router.device(1, "core-1");
    device.password = Secret::new("wrong");

    let status = test_client().get_system_metrics(&device).await;

    assert_matches!(status, SystemStatus::Offline { reason } if reason.contains("authentication failed"));
    assert_eq!(router.failed_logins(), 1);
    assert!(router.commands().is_empty());
}

#[tokio::test]
async fn test_unreachable_device_is_offline() {
    let device = unreachable_device(7, "gone").await;

    let status = test_client().get_system_metrics(&device).await;

    assert_matches!(status, SystemStatus::Offline { .. });
}

#[tokio::test]
async fn test_empty_resource_reply_is_error() {
    let router = MockRouter::start(RouterScript::new()).await;
    let device = router.device(1, "core-1");

    let status = test_client().get_system_metrics(&device).await;

    assert_matches!(status, SystemStatus::Error { .. });
    assert_eq!(router.quits(), 1);
}

#[tokio::test]
async fn test_encrypted_password_is_decrypted_for_login() {
    let vault = CredentialVault::new("operator key");
    let router = MockRouter::start(RouterScript::healthy(5)).await;
    let mut device = router.device(1, "core-1");
    device.password = Secret::new(vault.encrypt(PASSWORD).unwrap());

    let status = DeviceClient::new(&ConnectionConfig::default(), Some(vault))
        .get_system_metrics(&device)
        .await;
    assert!(status.is_online());

    // Without a vault the tagged password cannot be used
    let result = DeviceClient::new(&ConnectionConfig::default(), None)
        .get_connected_clients(&device)
        .await;
    assert_matches!(result, Err(DeviceError::Credential(_)));
}

#[tokio::test]
async fn test_connected_clients_with_failed_source() {
    let script = RouterScript::new()
        .reply(
            "/interface/wireless/registration-table/print",
            vec![vec![
                ("mac-address", "AA:BB:CC:00:11:22"),
                ("interface", "wlan1"),
                ("signal-strength", "-61dBm"),
            ]],
        )
        .reply(
            "/ip/dhcp-server/lease/print",
            vec![
                vec![("mac-address", "AA:BB:CC:00:11:23"), ("address", "192.168.88.10"), ("host-name", "laptop")],
                vec![("mac-address", "AA:BB:CC:00:11:24"), ("address", "192.168.88.11")],
            ],
        )
        .trap("/caps-man/registration-table/print", "no such command prefix");
    let router = MockRouter::start(script).await;

    let clients = test_client()
        .get_connected_clients(&router.device(1, "ap"))
        .await
        .unwrap();

    assert_eq!(clients.wireless.len(), 1);
    assert_eq!(clients.wireless[0].interface, "wlan1");
    assert_eq!(clients.dhcp.len(), 2);
    assert_eq!(clients.dhcp[0].host_name, "laptop");
    assert!(clients.capsman.is_empty());
    assert_eq!(clients.total, 3);
    assert_eq!(clients.failed_sources, vec!["capsman".to_string()]);
    assert_matches!(clients.ensure_complete(), Err(DeviceError::PartialResult(_)));
}

#[tokio::test]
async fn test_interface_traffic_filters() {
    let script = RouterScript::new().reply(
        "/interface/print",
        vec![
            vec![("name", "ether1"), ("type", "ether"), ("rx-byte", "1000"), ("tx-byte", "2000"), ("running", "true")],
            vec![("name", "bridge"), ("type", "bridge"), ("rx-byte", "10")],
            vec![("name", "wg0"), ("type", "wg"), ("disabled", "true")],
        ],
    );
    let router = MockRouter::start(script).await;
    let device = router.device(1, "core-1");
    let client = test_client();

    let default = client.get_interface_traffic(&device, None, None).await.unwrap();
    let names: Vec<_> = default.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["ether1", "bridge"]);
    assert_eq!(default[0].rx_bytes, 1000);
    assert!(default[0].running);

    let all = client.get_interface_traffic(&device, None, Some(&[])).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(!all[2].enabled);

    let one = client
        .get_interface_traffic(&device, Some("wg0"), Some(&["wg".to_string()]))
        .await
        .unwrap();
    assert_eq!(one.len(), 1);
}

#[tokio::test]
async fn test_raw_command_words_reach_router() {
    let script = RouterScript::new().reply(
        "/ip/address/print",
        vec![vec![("address", "10.0.0.1/24"), ("interface", "ether1")]],
    );
    let router = MockRouter::start(script).await;

    let rows = test_client()
        .send_raw_command(&router.device(1, "core-1"), "ip address print ?interface=ether1")
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["address"], "10.0.0.1/24");
    assert_eq!(
        router.commands(),
        vec![vec!["/ip/address/print".to_string(), "?interface=ether1".to_string()]]
    );
}

#[tokio::test]
async fn test_trapped_command_is_rejected() {
    let router = MockRouter::start(RouterScript::new()).await;

    let result = test_client()
        .send_raw_command(&router.device(1, "core-1"), "/system/reboot-now")
        .await;

    assert_matches!(result, Err(DeviceError::Rejected(message)) if message == "no such command prefix");
    assert_eq!(router.quits(), 1);
}

#[tokio::test]
async fn test_vpn_status_collects_every_technology() {
    let script = RouterScript::new()
        .reply(
            "/interface/l2tp-server/active/print",
            vec![vec![("name", "<l2tp-alice>"), ("user", "alice"), ("address", "10.9.0.2"), ("uptime", "1h")]],
        )
        .reply(
            "/interface/ovpn-server/server/print",
            vec![vec![("enabled", "true"), ("port", "1195"), ("auth", "sha1")]],
        )
        .reply(
            "/ip/ipsec/proposal/print",
            vec![vec![("name", "default"), ("enc-algorithms", "aes-256-cbc"), ("auth-algorithms", "sha256")]],
        )
        .trap("/interface/sstp-server/server/print", "not permitted");
    let router = MockRouter::start(script).await;

    let status = test_client()
        .get_vpn_status(&router.device(1, "edge"))
        .await
        .unwrap();

    assert_eq!(status.total_connections, 1);
    assert_eq!(status.connections_by_type[&VpnKind::L2tp], 1);
    assert_eq!(status.connections_by_type[&VpnKind::Pptp], 0);
    assert_eq!(status.active_connections[0].user.as_deref(), Some("alice"));

    let ovpn = &status.servers[&VpnKind::Ovpn];
    assert!(ovpn.enabled);
    assert_eq!(ovpn.port, 1195);
    assert_eq!(ovpn.authentication, vec!["certificate".to_string(), "sha1".to_string()]);
    assert!(!status.servers[&VpnKind::Pptp].enabled);

    assert_eq!(status.ipsec.proposals.len(), 1);
    assert!(!status.ipsec.enabled);
    assert_eq!(status.failed_sources, vec!["SSTP-server".to_string()]);
}

#[tokio::test]
async fn test_vpn_users_skip_authorities() {
    let script = RouterScript::new()
        .reply(
            "/ppp/secret/print",
            vec![
                vec![("name", "alice"), ("service", "l2tp"), ("profile", "vpn")],
                vec![("name", "bob"), ("service", "any"), ("disabled", "true")],
            ],
        )
        .reply(
            "/certificate/print",
            vec![
                vec![
                    ("name", "root-ca"),
                    ("common-name", "root-ca"),
                    ("key-usage", "key-cert-sign,crl-sign"),
                ],
                vec![
                    ("name", "carol-laptop"),
                    ("common-name", "carol"),
                    ("key-usage", "tls-client"),
                    ("invalid-after", "2026-03-01 00:00:00"),
                ],
            ],
        );
    let router = MockRouter::start(script).await;

    let users = test_client()
        .get_vpn_users(&router.device(1, "edge"))
        .await
        .unwrap();

    let names: Vec<&str> = users.ppp_users.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob"]);
    assert!(users.ppp_users[1].disabled);
    assert_eq!(users.ovpn_users.len(), 1);
    assert_eq!(users.ovpn_users[0].common_name, "carol");
    assert!(users.failed_sources.is_empty());
    assert_eq!(router.quits(), 1);
}

#[tokio::test]
async fn test_vpn_users_report_failed_table() {
    let script = RouterScript::new()
        .reply("/ppp/secret/print", vec![vec![("name", "alice")]])
        .trap("/certificate/print", "not enough permissions (9)");
    let router = MockRouter::start(script).await;

    let users = test_client()
        .get_vpn_users(&router.device(1, "edge"))
        .await
        .unwrap();

    assert_eq!(users.ppp_users.len(), 1);
    assert!(users.ovpn_users.is_empty());
    assert_eq!(users.failed_sources, vec!["certificates".to_string()]);
}

#[tokio::test]
async fn test_backup_without_file_is_not_found() {
    let router = MockRouter::start(RouterScript::new().reply("/system/backup/save", vec![])).await;

    let result = test_client().backup_configuration(&router.device(1, "core 1")).await;

    assert_matches!(result, Err(DeviceError::NotFound(_)));
    let commands = router.commands();
    assert_eq!(commands[0][0], "/system/backup/save");
    assert!(commands[0][1].starts_with("=name=backup_core_1_"));
}

#[tokio::test]
async fn test_restore_loads_existing_file() {
    let script = RouterScript::new()
        .reply(
            "/file/print",
            vec![vec![("name", "nightly.backup"), ("size", "24.5 KiB"), ("type", "backup")]],
        )
        .reply("/system/backup/load", vec![]);
    let router = MockRouter::start(script).await;
    let device = router.device(1, "core-1");
    let client = test_client();

    let outcome = client.restore_configuration(&device, "nightly.backup").await.unwrap();
    assert_eq!(outcome.filename, "nightly.backup");
    assert!(
        router
            .commands()
            .contains(&vec!["/system/backup/load".to_string(), "=name=nightly".to_string()])
    );

    let missing = client.restore_configuration(&device, "other.backup").await;
    assert_matches!(missing, Err(DeviceError::NotFound(_)));

    let empty = client.restore_configuration(&device, "  ").await;
    assert_matches!(empty, Err(DeviceError::InvalidInput(_)));
}
