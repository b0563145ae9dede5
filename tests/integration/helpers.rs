//! Test helpers: a scripted RouterOS API server and fixture builders

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tikmon::config::ConnectionConfig;
use tikmon::device::DeviceClient;
use tikmon::routeros::SessionOptions;
use tikmon::routeros::codec::{read_sentence, write_sentence};
use tikmon::{AlertRule, Device, DeviceId, MetricCategory, MetricSample, Operator, Secret};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "secret";

/// Canned replies keyed by command path.
#[derive(Debug, Clone, Default)]
pub struct RouterScript {
    rows: HashMap<String, Vec<Vec<(String, String)>>>,
    traps: HashMap<String, String>,
}

impl RouterScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `path` with one `!re` row per entry.
    pub fn reply(mut self, path: &str, rows: Vec<Vec<(&str, &str)>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .collect();
        self.rows.insert(path.to_string(), rows);
        self
    }

    /// Answer `path` with a `!trap`.
    pub fn trap(mut self, path: &str, message: &str) -> Self {
        self.traps.insert(path.to_string(), message.to_string());
        self
    }

    /// A healthy router reporting the given CPU load.
    pub fn healthy(cpu_load: u32) -> Self {
        let cpu = cpu_load.to_string();
        Self::new().reply(
            "/system/resource/print",
            vec![vec![
                ("cpu-load", cpu.as_str()),
                ("cpu-count", "2"),
                ("total-memory", "268435456"),
                ("free-memory", "201326592"),
                ("total-hdd-space", "134217728"),
                ("free-hdd-space", "100663296"),
                ("uptime", "1w2d3h4m5s"),
                ("version", "7.14.2 (stable)"),
                ("board-name", "RB5009UG+S+"),
                ("architecture-name", "arm64"),
            ]],
        )
    }
}

/// Everything the mock router saw.
#[derive(Debug, Default)]
pub struct RouterLog {
    pub logins: usize,
    pub failed_logins: usize,
    pub commands: Vec<Vec<String>>,
    pub quits: usize,
}

pub struct MockRouter {
    pub addr: SocketAddr,
    log: Arc<Mutex<RouterLog>>,
    task: JoinHandle<()>,
}

impl MockRouter {
    pub async fn start(script: RouterScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(RouterLog::default()));
        let script = Arc::new(script);

        let task = {
            let log = log.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, script.clone(), log.clone()));
                }
            })
        };

        Self { addr, log, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Device pointing at this router over plain TCP.
    pub fn device(&self, id: DeviceId, name: &str) -> Device {
        Device {
            id,
            name: name.to_string(),
            address: "127.0.0.1".to_string(),
            username: USERNAME.to_string(),
            password: Secret::new(PASSWORD),
            api_port: self.port(),
            use_tls: false,
            model: Some("RB5009".to_string()),
            location: None,
            notes: None,
        }
    }

    pub fn logins(&self) -> usize {
        self.log.lock().unwrap().logins
    }

    pub fn failed_logins(&self) -> usize {
        self.log.lock().unwrap().failed_logins
    }

    pub fn quits(&self) -> usize {
        self.log.lock().unwrap().quits
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.log.lock().unwrap().commands.clone()
    }
}

impl Drop for MockRouter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, script: Arc<RouterScript>, log: Arc<Mutex<RouterLog>>) {
    let mut authenticated = false;

    while let Ok(sentence) = read_sentence(&mut stream).await {
        let Some(command) = sentence.first().cloned() else {
            continue;
        };

        let reply: Vec<Vec<String>> = match command.as_str() {
            "/login" => {
                let expected = format!("=password={PASSWORD}");
                if sentence.iter().any(|w| w == &expected) {
                    authenticated = true;
                    log.lock().unwrap().logins += 1;
                    vec![vec!["!done".to_string()]]
                } else {
                    log.lock().unwrap().failed_logins += 1;
                    trap("invalid user name or password (6)")
                }
            }
            "/quit" => {
                log.lock().unwrap().quits += 1;
                let _ = write_sentence(&mut stream, &["!fatal", "session terminated on request"]).await;
                return;
            }
            _ if !authenticated => trap("not logged in"),
            path => {
                log.lock().unwrap().commands.push(sentence.clone());
                if let Some(message) = script.traps.get(path) {
                    trap(message)
                } else if let Some(rows) = script.rows.get(path) {
                    let mut reply: Vec<Vec<String>> = rows
                        .iter()
                        .map(|row| {
                            std::iter::once("!re".to_string())
                                .chain(row.iter().map(|(k, v)| format!("={k}={v}")))
                                .collect()
                        })
                        .collect();
                    reply.push(vec!["!done".to_string()]);
                    reply
                } else if path.ends_with("/print") {
                    vec![vec!["!done".to_string()]]
                } else {
                    trap("no such command prefix")
                }
            }
        };

        for sentence in reply {
            if write_sentence(&mut stream, &sentence).await.is_err() {
                return;
            }
        }
    }
}

fn trap(message: &str) -> Vec<Vec<String>> {
    vec![
        vec!["!trap".to_string(), format!("=message={message}")],
        vec!["!done".to_string()],
    ]
}

/// Client with short timeouts and no retry delay.
pub fn test_client() -> DeviceClient {
    let config = ConnectionConfig {
        timeout: 2,
        command_timeout: 2,
        retries: 1,
        retry_delay: 0,
        backup_wait: 0,
        restore_wait: 0,
    };
    DeviceClient::new(&config, None).with_session_options(SessionOptions {
        connect_timeout: std::time::Duration::from_secs(2),
        command_timeout: std::time::Duration::from_secs(2),
    })
}

/// A device whose port has nothing listening.
pub async fn unreachable_device(id: DeviceId, name: &str) -> Device {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    Device {
        id,
        name: name.to_string(),
        address: "127.0.0.1".to_string(),
        username: USERNAME.to_string(),
        password: Secret::new(PASSWORD),
        api_port: port,
        use_tls: false,
        model: None,
        location: None,
        notes: None,
    }
}

pub fn cpu_rule(id: i64, device_id: DeviceId, threshold: f64) -> AlertRule {
    AlertRule {
        id,
        name: format!("CPU above {threshold}"),
        device_id,
        metric: "cpu_load".to_string(),
        operator: Operator::GreaterThan,
        threshold,
        duration: 0,
        enabled: true,
        notify_email: false,
        notify_chat: false,
        email_recipients: None,
        message_template: None,
    }
}

pub fn cpu_sample(device_id: DeviceId, value: f64, timestamp: DateTime<Utc>) -> MetricSample {
    MetricSample::new(device_id, MetricCategory::Cpu, "load", value, timestamp)
}
