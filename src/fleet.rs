//! Fleet façade
//!
//! Ties the persisted device catalog to the live connection table and the
//! subnet scanner. Registry mutations go through here so that connection
//! state can never outlive a catalog entry: removing a device disconnects
//! it first.

use std::collections::HashSet;
use std::sync::{Arc, MutexGuard};

use crate::config::{ConfigStore, Device, DeviceId, SharedConfig};
use crate::discovery::{DiscoveredDevice, NetworkScanner};
use crate::events::ProgressFn;
use crate::terminal::{RemoteUser, TerminalConnector, TerminalLink};

pub struct Fleet {
    config: SharedConfig,
    link: Arc<TerminalLink>,
    scanner: NetworkScanner,
}

impl Fleet {
    pub fn new(
        config: SharedConfig,
        link: Arc<TerminalLink>,
        connector: Arc<dyn TerminalConnector>,
    ) -> Self {
        let workers = {
            let store = config.lock().unwrap_or_else(|e| e.into_inner());
            store.settings().scan_threads
        };
        Self {
            config,
            link,
            scanner: NetworkScanner::new(connector, workers),
        }
    }

    fn lock_config(&self) -> MutexGuard<'_, ConfigStore> {
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn link(&self) -> &Arc<TerminalLink> {
        &self.link
    }

    pub fn devices(&self) -> Vec<Device> {
        self.lock_config().devices().to_vec()
    }

    pub fn device_by_id(&self, id: DeviceId) -> Option<Device> {
        self.lock_config().device_by_id(id).cloned()
    }

    pub fn device_by_name(&self, name: &str) -> Option<Device> {
        self.lock_config().device_by_name(name).cloned()
    }

    /// Add a device to the catalog. The assigned id is authoritative;
    /// whatever id the caller put on the record is replaced.
    pub fn add_device(&self, device: Device) -> DeviceId {
        let id = self.lock_config().add_device(device);
        log::info!("[fleet] device {} added", id);
        id
    }

    pub fn update_device(&self, id: DeviceId, device: Device) -> bool {
        self.lock_config().update_device(id, device)
    }

    /// Remove a device from the catalog, closing its live connection
    /// first so no session survives the catalog entry.
    pub async fn remove_device(&self, id: DeviceId) -> bool {
        self.link.disconnect(id).await;
        let removed = self.lock_config().delete_device(id);
        if removed {
            log::info!("[fleet] device {} removed", id);
        }
        removed
    }

    /// Adopt a discovery result into the catalog.
    pub fn accept_discovered(&self, found: &DiscoveredDevice) -> DeviceId {
        self.add_device(found.to_device())
    }

    /// Connect one catalog device by id.
    pub async fn connect_device(&self, id: DeviceId) -> bool {
        let Some(device) = self.device_by_id(id) else {
            log::warn!("[fleet] connect requested for unknown device {}", id);
            return false;
        };
        self.link.connect(&device).await
    }

    /// Connect every catalog device concurrently. Returns how many
    /// connected.
    pub async fn connect_all(&self, progress: Option<ProgressFn>) -> usize {
        let devices = self.devices();
        Arc::clone(&self.link).connect_all(devices, progress).await
    }

    pub async fn disconnect_all(&self) {
        self.link.disconnect_all().await;
    }

    /// Enroll a personnel record as a user on a connected device. A
    /// personnel id that does not fit the protocol's numeric uid is a
    /// reported, non-fatal failure.
    pub async fn provision_user(&self, id: DeviceId, personnel_id: &str, full_name: &str) -> bool {
        match RemoteUser::from_personnel(personnel_id, full_name) {
            Ok(user) => self.link.write_user(id, &user).await,
            Err(e) => {
                log::error!("[fleet] cannot enroll {}: {}", personnel_id, e);
                false
            }
        }
    }

    /// Scan the local /24 for terminals, filtering out addresses already
    /// present in the catalog.
    pub async fn discover(&self, progress: Option<ProgressFn>) -> Vec<DiscoveredDevice> {
        let known: HashSet<String> = self
            .devices()
            .into_iter()
            .map(|device| device.ip)
            .collect();
        let found = self.scanner.scan(progress).await;
        let fresh: Vec<DiscoveredDevice> = found
            .into_iter()
            .filter(|device| !known.contains(&device.ip))
            .collect();
        log::info!("[fleet] discovery finished, {} new device(s)", fresh.len());
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::events::{LogSink, NullSink};
    use crate::terminal::{MockConnector, MockTerminal};

    fn fleet_with(connector: Arc<MockConnector>) -> (tempfile::TempDir, Fleet) {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::load(dir.path().join("config.json")).into_shared();
        let link = Arc::new(TerminalLink::new(
            connector.clone() as Arc<dyn TerminalConnector>,
            Arc::new(NullSink) as Arc<dyn LogSink>,
        ));
        let fleet = Fleet::new(config, link, connector as Arc<dyn TerminalConnector>);
        (dir, fleet)
    }

    fn device(name: &str, ip: &str) -> Device {
        Device {
            id: DeviceId(0),
            name: name.to_string(),
            ip: ip.to_string(),
            port: 4370,
            protocol: "TCP".to_string(),
            timeout: 30,
            password: 0,
            force_udp: false,
        }
    }

    #[tokio::test]
    async fn removing_a_device_disconnects_it_first() {
        let connector = Arc::new(MockConnector::new());
        connector.add_terminal("10.0.0.5", MockTerminal::default());
        let (_dir, fleet) = fleet_with(connector);

        let id = fleet.add_device(device("Door A", "10.0.0.5"));
        assert!(fleet.connect_device(id).await);
        assert!(fleet.link().is_connected(id).await);

        assert!(fleet.remove_device(id).await);
        assert!(!fleet.link().is_connected(id).await);
        assert!(fleet.device_by_id(id).is_none());
    }

    #[tokio::test]
    async fn connect_rejects_unknown_ids() {
        let connector = Arc::new(MockConnector::new());
        let (_dir, fleet) = fleet_with(connector);
        assert!(!fleet.connect_device(DeviceId(42)).await);
    }

    #[tokio::test]
    async fn provisioning_converts_personnel_ids() {
        let connector = Arc::new(MockConnector::new());
        connector.add_terminal("10.0.0.5", MockTerminal::default());
        let (_dir, fleet) = fleet_with(connector);

        let id = fleet.add_device(device("Door A", "10.0.0.5"));
        assert!(fleet.connect_device(id).await);

        assert!(fleet.provision_user(id, "7", "Jane").await);
        let users = fleet.link().list_users(id).await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].uid, 7);
        assert_eq!(users[0].name, "Jane");

        // Non-numeric personnel id cannot map to a terminal uid.
        assert!(!fleet.provision_user(id, "TEST001", "Test").await);
    }

    #[tokio::test]
    async fn accepted_discovery_gets_a_fresh_id() {
        let connector = Arc::new(MockConnector::new());
        let (_dir, fleet) = fleet_with(connector);

        let first = fleet.add_device(device("Lobby", "10.0.0.2"));
        let found = DiscoveredDevice {
            ip: "10.0.0.9".to_string(),
            port: 4370,
            name: "ZKTeco Device (10.0.0.9)".to_string(),
            protocol: "TCP".to_string(),
            timeout: 30,
            password: 0,
            force_udp: false,
        };
        let id = fleet.accept_discovered(&found);
        assert_ne!(id, first);
        let adopted = fleet.device_by_id(id).unwrap();
        assert_eq!(adopted.ip, "10.0.0.9");
        assert_eq!(adopted.port, 4370);
    }
}
