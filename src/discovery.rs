//! Network discovery
//!
//! Parallel probe of the local /24 for unconfigured terminals. Each probe
//! is two steps: a short TCP connect to port 4370, then a protocol
//! handshake through the injected connector. A handshake success reads the
//! device's self-reported name best-effort and closes immediately;
//! discovery never holds a connection open. Failed probes return nothing
//! and no per-IP error reaches the caller.

use std::net::{Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::config::{Device, DeviceId};
use crate::events::ProgressFn;
use crate::terminal::protocol::TerminalConnector;
use crate::terminal::types::ConnectOptions;

/// Port probed during discovery.
pub const DISCOVERY_PORT: u16 = 4370;
/// Timeout for the raw TCP connect step.
pub const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Timeout for the protocol handshake step.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// A terminal found on the network, ready to be accepted into the catalog.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiscoveredDevice {
    pub ip: String,
    pub port: u16,
    pub name: String,
    pub protocol: String,
    pub timeout: u64,
    pub password: u32,
    pub force_udp: bool,
}

impl DiscoveredDevice {
    fn at(ip: Ipv4Addr, port: u16, name: Option<String>) -> Self {
        let name = match name {
            Some(name) if !name.trim().is_empty() => format!("{} ({})", name.trim(), ip),
            _ => format!("ZKTeco Device ({})", ip),
        };
        Self {
            ip: ip.to_string(),
            port,
            name,
            protocol: "TCP".to_string(),
            timeout: 30,
            password: 0,
            force_udp: false,
        }
    }

    /// Device record for the catalog; the registry assigns the id on add.
    pub fn to_device(&self) -> Device {
        Device {
            id: DeviceId(0),
            name: self.name.clone(),
            ip: self.ip.clone(),
            port: self.port,
            protocol: self.protocol.clone(),
            timeout: self.timeout,
            password: self.password,
            force_udp: self.force_udp,
        }
    }
}

/// One discovery probe against a single host.
#[async_trait]
pub trait Probe: Send + Sync {
    /// `Some` iff the host answers the port probe and the handshake.
    async fn probe(&self, ip: Ipv4Addr) -> Option<DiscoveredDevice>;
}

/// Production probe: TCP port check, then protocol handshake.
pub struct HandshakeProbe {
    connector: Arc<dyn TerminalConnector>,
    port: u16,
}

impl HandshakeProbe {
    pub fn new(connector: Arc<dyn TerminalConnector>) -> Self {
        Self::with_port(connector, DISCOVERY_PORT)
    }

    fn with_port(connector: Arc<dyn TerminalConnector>, port: u16) -> Self {
        Self { connector, port }
    }
}

#[async_trait]
impl Probe for HandshakeProbe {
    async fn probe(&self, ip: Ipv4Addr) -> Option<DiscoveredDevice> {
        // Fast port check before the heavier handshake.
        let stream = timeout(PORT_PROBE_TIMEOUT, TcpStream::connect((ip, self.port)))
            .await
            .ok()?
            .ok()?;
        drop(stream);

        let opts = ConnectOptions {
            ip: ip.to_string(),
            port: self.port,
            timeout: HANDSHAKE_TIMEOUT,
            password: 0,
            force_udp: false,
        };
        let mut session = timeout(HANDSHAKE_TIMEOUT, self.connector.connect(&opts))
            .await
            .ok()?
            .ok()?;

        // Name is best-effort; absence does not fail the probe.
        let name = session.device_name().await.ok().flatten();
        let _ = session.disconnect().await;
        log::info!("[scan] terminal found at {}", ip);
        Some(DiscoveredDevice::at(ip, self.port, name))
    }
}

/// Bounded-concurrency subnet scanner.
pub struct NetworkScanner {
    probe: Arc<dyn Probe>,
    workers: usize,
}

impl NetworkScanner {
    pub fn new(connector: Arc<dyn TerminalConnector>, workers: usize) -> Self {
        Self::with_probe(Arc::new(HandshakeProbe::new(connector)), workers)
    }

    pub fn with_probe(probe: Arc<dyn Probe>, workers: usize) -> Self {
        Self {
            probe,
            workers: workers.max(1),
        }
    }

    /// Scan the /24 containing the machine's primary IP. Returns found
    /// devices in completion order; an undetectable local subnet logs an
    /// error and yields no results.
    pub async fn scan(&self, progress: Option<ProgressFn>) -> Vec<DiscoveredDevice> {
        let Some(local) = local_ipv4() else {
            log::error!("[scan] could not determine local IP address");
            return Vec::new();
        };
        let hosts = subnet_hosts(local);
        if let Some(progress) = &progress {
            let octets = local.octets();
            progress(&format!(
                "scan range: {}.{}.{}.0/24 ({} hosts)",
                octets[0],
                octets[1],
                octets[2],
                hosts.len()
            ));
        }
        self.scan_hosts(hosts, progress).await
    }

    /// Probe an explicit host list. Progress is reported as "N/total" as
    /// each probe completes, in whatever order probes finish.
    pub async fn scan_hosts(
        &self,
        hosts: Vec<Ipv4Addr>,
        progress: Option<ProgressFn>,
    ) -> Vec<DiscoveredDevice> {
        let total = hosts.len();
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for ip in hosts {
            let probe = Arc::clone(&self.probe);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                probe.probe(ip).await
            });
        }

        let mut found = Vec::new();
        let mut scanned = 0usize;
        while let Some(result) = tasks.join_next().await {
            scanned += 1;
            if let Some(progress) = &progress {
                let percent = scanned * 100 / total.max(1);
                progress(&format!("scanning {}/{} ({}%)", scanned, total, percent));
            }
            if let Ok(Some(device)) = result {
                found.push(device);
            }
        }
        found
    }
}

/// Primary local IPv4 address, resolved by routing a UDP socket toward a
/// public address (no packet is sent).
fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()? {
        std::net::SocketAddr::V4(addr) => Some(*addr.ip()),
        std::net::SocketAddr::V6(_) => None,
    }
}

/// All host addresses of the /24 containing `ip`.
fn subnet_hosts(ip: Ipv4Addr) -> Vec<Ipv4Addr> {
    let [a, b, c, _] = ip.octets();
    (1..=254).map(|d| Ipv4Addr::new(a, b, c, d)).collect()
}
