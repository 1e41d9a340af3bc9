//! Terminal link: per-device connection lifecycle and typed operations.
//!
//! Owns the live-connection table (one session per device id; a reconnect
//! overwrites). Every operation emits a structured event to the injected
//! sink and converts all failures into logged outcomes; nothing at this
//! layer raises past the boundary, and nothing here retries. A failed
//! call is reported once; retry is a scheduler-level concern.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::config::{Device, DeviceId};
use crate::events::{ConnectionEvent, EventCategory, EventStatus, LogSink, ProgressFn};

use super::protocol::{TerminalConnector, TerminalSession};
use super::types::{RawAttendance, RemoteUser};

struct LiveConnection {
    device: Device,
    session: Box<dyn TerminalSession>,
}

/// Result of clearing attendance on every connected device.
#[derive(Debug, Default)]
pub struct ClearSummary {
    pub cleared: Vec<String>,
    pub failed: Vec<String>,
}

/// Connection manager for the terminal fleet.
pub struct TerminalLink {
    connector: Arc<dyn TerminalConnector>,
    connections: Mutex<HashMap<DeviceId, LiveConnection>>,
    sink: Arc<dyn LogSink>,
}

impl TerminalLink {
    pub fn new(connector: Arc<dyn TerminalConnector>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            connector,
            connections: Mutex::new(HashMap::new()),
            sink,
        }
    }

    fn emit(
        &self,
        device: &str,
        operation: &str,
        status: EventStatus,
        detail: String,
        category: EventCategory,
    ) {
        self.sink.log(ConnectionEvent {
            device: device.to_string(),
            operation: operation.to_string(),
            status,
            detail,
            category,
        });
    }

    /// Check a session out of the table for the duration of one
    /// operation, so slow device I/O never holds the table lock and
    /// blocks other devices. If the device reconnected while the session
    /// was out, the newer session wins and the checked-out one is dropped.
    async fn take_session(&self, id: DeviceId) -> Option<LiveConnection> {
        self.connections.lock().await.remove(&id)
    }

    async fn return_session(&self, id: DeviceId, live: LiveConnection) {
        self.connections.lock().await.entry(id).or_insert(live);
    }

    /// Connect to a device and store the live session under its id.
    /// Returns whether the connection was established; all failure detail
    /// goes to the log sink.
    pub async fn connect(&self, device: &Device) -> bool {
        self.emit(
            &device.name,
            "Connect",
            EventStatus::Attempting,
            format!("ip: {}, port: {}", device.ip, device.port),
            EventCategory::Connection,
        );

        match self.connector.connect(&device.into()).await {
            Ok(session) => {
                let mut connections = self.connections.lock().await;
                // One live connection per id: a reconnect replaces the old
                // session after a best-effort close.
                if let Some(mut old) = connections.remove(&device.id) {
                    let _ = old.session.disconnect().await;
                }
                connections.insert(
                    device.id,
                    LiveConnection {
                        device: device.clone(),
                        session,
                    },
                );
                log::info!("[terminal] connected to {} ({})", device.name, device.ip);
                self.emit(
                    &device.name,
                    "Connect",
                    EventStatus::Success,
                    "connection established".to_string(),
                    EventCategory::Connection,
                );
                true
            }
            Err(e) => {
                log::error!("[terminal] connect failed for {}: {}", device.name, e);
                self.emit(
                    &device.name,
                    "Connect",
                    EventStatus::Failure,
                    format!("connection failed: {}", e),
                    EventCategory::Connection,
                );
                false
            }
        }
    }

    /// Connect to every given device concurrently, reporting progress in
    /// completion order. Returns how many devices connected.
    pub async fn connect_all(
        self: Arc<Self>,
        devices: Vec<Device>,
        progress: Option<ProgressFn>,
    ) -> usize {
        let total = devices.len();
        let mut tasks = JoinSet::new();
        for device in devices {
            let link = Arc::clone(&self);
            tasks.spawn(async move {
                let ok = link.connect(&device).await;
                (device.name, ok)
            });
        }

        let mut done = 0usize;
        let mut connected = 0usize;
        while let Some(result) = tasks.join_next().await {
            done += 1;
            if let Ok((name, ok)) = result {
                if ok {
                    connected += 1;
                }
                if let Some(progress) = &progress {
                    let mark = if ok { "connected" } else { "failed" };
                    progress(&format!("{}: {} ({}/{})", name, mark, done, total));
                }
            }
        }
        connected
    }

    /// Disconnect a device. Idempotent: an unknown id is a signaled no-op.
    pub async fn disconnect(&self, id: DeviceId) -> bool {
        let removed = self.connections.lock().await.remove(&id);
        match removed {
            Some(mut live) => {
                let _ = live.session.disconnect().await;
                log::info!("[terminal] disconnected device {}", id);
                self.emit(
                    &live.device.name,
                    "Disconnect",
                    EventStatus::Success,
                    "connection closed".to_string(),
                    EventCategory::Connection,
                );
                true
            }
            None => {
                log::warn!("[terminal] disconnect: device {} not connected", id);
                false
            }
        }
    }

    pub async fn disconnect_all(&self) {
        let ids: Vec<DeviceId> = self.connections.lock().await.keys().copied().collect();
        for id in ids {
            self.disconnect(id).await;
        }
    }

    pub async fn is_connected(&self, id: DeviceId) -> bool {
        self.connections.lock().await.contains_key(&id)
    }

    /// Device records of all currently connected terminals.
    pub async fn connected_devices(&self) -> Vec<Device> {
        self.connections
            .lock()
            .await
            .values()
            .map(|live| live.device.clone())
            .collect()
    }

    pub async fn connected_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Fetch the user table from a device. Fails to an empty list on any
    /// error (logged), including an unknown id.
    pub async fn list_users(&self, id: DeviceId) -> Vec<RemoteUser> {
        let Some(mut live) = self.take_session(id).await else {
            log::warn!("[terminal] list_users: device {} not connected", id);
            return Vec::new();
        };
        let name = live.device.name.clone();
        self.emit(
            &name,
            "Fetch Users",
            EventStatus::Attempting,
            "fetching user table".to_string(),
            EventCategory::DataFetch,
        );
        let result = live.session.get_users().await;
        self.return_session(id, live).await;
        match result {
            Ok(users) => {
                let raw = serde_json::to_string_pretty(&users).unwrap_or_default();
                self.emit(
                    &name,
                    "Fetch Users",
                    EventStatus::Success,
                    format!("{} users fetched\n\nRAW DATA:\n{}", users.len(), raw),
                    EventCategory::DataFetch,
                );
                users
            }
            Err(e) => {
                log::error!("[terminal] user fetch failed for {}: {}", name, e);
                self.emit(
                    &name,
                    "Fetch Users",
                    EventStatus::Failure,
                    format!("error: {}", e),
                    EventCategory::DataFetch,
                );
                Vec::new()
            }
        }
    }

    /// Fetch all punch records from a device. Fails to an empty list on
    /// any error (logged).
    pub async fn list_attendance(&self, id: DeviceId) -> Vec<RawAttendance> {
        let Some(mut live) = self.take_session(id).await else {
            log::warn!("[terminal] list_attendance: device {} not connected", id);
            return Vec::new();
        };
        let name = live.device.name.clone();
        self.emit(
            &name,
            "Fetch Attendance",
            EventStatus::Attempting,
            "fetching punch records".to_string(),
            EventCategory::DataFetch,
        );
        let result = live.session.get_attendance().await;
        self.return_session(id, live).await;
        match result {
            Ok(records) => {
                let raw = serde_json::to_string_pretty(&records).unwrap_or_default();
                self.emit(
                    &name,
                    "Fetch Attendance",
                    EventStatus::Success,
                    format!("{} records fetched\n\nRAW DATA:\n{}", records.len(), raw),
                    EventCategory::DataFetch,
                );
                records
            }
            Err(e) => {
                log::error!("[terminal] attendance fetch failed for {}: {}", name, e);
                self.emit(
                    &name,
                    "Fetch Attendance",
                    EventStatus::Failure,
                    format!("error: {}", e),
                    EventCategory::DataFetch,
                );
                Vec::new()
            }
        }
    }

    /// Write (create or overwrite) a user on a device.
    pub async fn write_user(&self, id: DeviceId, user: &RemoteUser) -> bool {
        let Some(mut live) = self.take_session(id).await else {
            log::warn!("[terminal] write_user: device {} not connected", id);
            return false;
        };
        let name = live.device.name.clone();
        let result = live.session.set_user(user).await;
        self.return_session(id, live).await;
        match result {
            Ok(()) => {
                self.emit(
                    &name,
                    "Write User",
                    EventStatus::Success,
                    format!("user {} ({}) written", user.uid, user.name),
                    EventCategory::DataManagement,
                );
                true
            }
            Err(e) => {
                log::error!("[terminal] write_user failed for {}: {}", name, e);
                self.emit(
                    &name,
                    "Write User",
                    EventStatus::Failure,
                    format!("error: {}", e),
                    EventCategory::DataManagement,
                );
                false
            }
        }
    }

    /// Delete a user from a device by terminal uid.
    pub async fn delete_user(&self, id: DeviceId, uid: u16) -> bool {
        let Some(mut live) = self.take_session(id).await else {
            log::warn!("[terminal] delete_user: device {} not connected", id);
            return false;
        };
        let name = live.device.name.clone();
        let result = live.session.delete_user(uid).await;
        self.return_session(id, live).await;
        match result {
            Ok(()) => {
                self.emit(
                    &name,
                    "Delete User",
                    EventStatus::Success,
                    format!("user {} deleted", uid),
                    EventCategory::DataManagement,
                );
                true
            }
            Err(e) => {
                log::error!("[terminal] delete_user failed for {}: {}", name, e);
                self.emit(
                    &name,
                    "Delete User",
                    EventStatus::Failure,
                    format!("error: {}", e),
                    EventCategory::DataManagement,
                );
                false
            }
        }
    }

    /// Wipe stored punch records on a device.
    pub async fn clear_attendance(&self, id: DeviceId) -> bool {
        let Some(mut live) = self.take_session(id).await else {
            log::warn!("[terminal] clear_attendance: device {} not connected", id);
            return false;
        };
        let name = live.device.name.clone();
        let result = live.session.clear_attendance().await;
        self.return_session(id, live).await;
        match result {
            Ok(()) => {
                self.emit(
                    &name,
                    "Clear Attendance",
                    EventStatus::Success,
                    "punch records cleared".to_string(),
                    EventCategory::DataManagement,
                );
                true
            }
            Err(e) => {
                log::error!("[terminal] clear_attendance failed for {}: {}", name, e);
                self.emit(
                    &name,
                    "Clear Attendance",
                    EventStatus::Failure,
                    format!("error: {}", e),
                    EventCategory::DataManagement,
                );
                false
            }
        }
    }

    /// Clear attendance on every connected device, each independently.
    /// Per-device failures are collected, not propagated.
    pub async fn clear_all_attendance(&self) -> ClearSummary {
        let devices = self.connected_devices().await;
        let mut summary = ClearSummary::default();
        for device in devices {
            if self.clear_attendance(device.id).await {
                summary.cleared.push(device.name);
            } else {
                summary.failed.push(device.name);
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::mock::{MockConnector, MockTerminal};
    use crate::terminal::types::PRIVILEGE_USER;

    fn device(id: u32, name: &str, ip: &str) -> Device {
        Device {
            id: DeviceId(id),
            name: name.to_string(),
            ip: ip.to_string(),
            port: 4370,
            protocol: "TCP".to_string(),
            timeout: 30,
            password: 0,
            force_udp: false,
        }
    }

    fn user(uid: u16, name: &str) -> RemoteUser {
        RemoteUser {
            uid,
            name: name.to_string(),
            privilege: PRIVILEGE_USER,
            password: String::new(),
            group_id: String::new(),
            user_id: String::new(),
            card: String::new(),
        }
    }

    fn link_with(connector: MockConnector) -> (Arc<TerminalLink>, Arc<crate::events::MemorySink>) {
        let sink = Arc::new(crate::events::MemorySink::new());
        let link = Arc::new(TerminalLink::new(
            Arc::new(connector),
            sink.clone() as Arc<dyn LogSink>,
        ));
        (link, sink)
    }

    #[tokio::test]
    async fn connect_and_disconnect() {
        let connector = MockConnector::new();
        connector.add_terminal("10.0.0.5", MockTerminal::default());
        let (link, sink) = link_with(connector);

        let door = device(1, "Door A", "10.0.0.5");
        assert!(link.connect(&door).await);
        assert!(link.is_connected(DeviceId(1)).await);
        assert_eq!(link.connected_count().await, 1);

        assert!(link.disconnect(DeviceId(1)).await);
        assert!(!link.is_connected(DeviceId(1)).await);
        // Unknown id: signaled no-op, not fatal.
        assert!(!link.disconnect(DeviceId(1)).await);

        let events = sink.take();
        assert!(events
            .iter()
            .any(|e| e.operation == "Connect" && e.status == EventStatus::Success));
    }

    #[tokio::test]
    async fn connect_failure_is_reported_not_raised() {
        let (link, sink) = link_with(MockConnector::new());
        assert!(!link.connect(&device(1, "Ghost", "10.0.0.99")).await);
        assert!(!link.is_connected(DeviceId(1)).await);
        assert!(sink
            .take()
            .iter()
            .any(|e| e.operation == "Connect" && e.status == EventStatus::Failure));
    }

    #[tokio::test]
    async fn reconnect_overwrites_existing_connection() {
        let connector = MockConnector::new();
        connector.add_terminal("10.0.0.5", MockTerminal::default());
        let (link, _sink) = link_with(connector);

        let door = device(1, "Door A", "10.0.0.5");
        assert!(link.connect(&door).await);
        assert!(link.connect(&door).await);
        assert_eq!(link.connected_count().await, 1);
    }

    #[tokio::test]
    async fn fetch_errors_fail_to_empty_lists() {
        let connector = MockConnector::new();
        connector.add_terminal(
            "10.0.0.5",
            MockTerminal {
                fail_operations: true,
                ..MockTerminal::default()
            },
        );
        let (link, sink) = link_with(connector);
        assert!(link.connect(&device(1, "Door A", "10.0.0.5")).await);

        assert!(link.list_users(DeviceId(1)).await.is_empty());
        assert!(link.list_attendance(DeviceId(1)).await.is_empty());
        // Not connected at all: also empty, no panic.
        assert!(link.list_users(DeviceId(9)).await.is_empty());

        let failures: Vec<_> = sink
            .take()
            .into_iter()
            .filter(|e| e.status == EventStatus::Failure)
            .collect();
        assert_eq!(failures.len(), 2);
    }

    #[tokio::test]
    async fn write_and_delete_user_round_trip() {
        let connector = MockConnector::new();
        connector.add_terminal("10.0.0.5", MockTerminal::default());
        let (link, _sink) = link_with(connector);
        assert!(link.connect(&device(1, "Door A", "10.0.0.5")).await);

        assert!(link.write_user(DeviceId(1), &user(7, "Jane")).await);
        let users = link.list_users(DeviceId(1)).await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].name, "Jane");

        assert!(link.delete_user(DeviceId(1), 7).await);
        assert!(link.list_users(DeviceId(1)).await.is_empty());
    }

    #[tokio::test]
    async fn connect_all_reports_completion_order_progress() {
        let connector = MockConnector::new();
        connector.add_terminal("10.0.0.5", MockTerminal::default());
        connector.add_terminal("10.0.0.6", MockTerminal::default());
        let (link, _sink) = link_with(connector);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in_cb = seen.clone();
        let progress: ProgressFn = Arc::new(move |msg: &str| {
            seen_in_cb.lock().unwrap().push(msg.to_string());
        });

        let devices = vec![
            device(1, "Door A", "10.0.0.5"),
            device(2, "Door B", "10.0.0.6"),
            device(3, "Ghost", "10.0.0.99"),
        ];
        let connected = link.clone().connect_all(devices, Some(progress)).await;

        assert_eq!(connected, 2);
        let messages = seen.lock().unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().any(|m| m.ends_with("(3/3)")));
    }

    #[tokio::test]
    async fn clear_all_attendance_isolates_device_failures() {
        let connector = MockConnector::new();
        connector.add_terminal("10.0.0.5", MockTerminal::default());
        connector.add_terminal(
            "10.0.0.6",
            MockTerminal {
                fail_operations: true,
                ..MockTerminal::default()
            },
        );
        let (link, _sink) = link_with(connector);
        assert!(link.connect(&device(1, "Door A", "10.0.0.5")).await);
        assert!(link.connect(&device(2, "Door B", "10.0.0.6")).await);

        let summary = link.clear_all_attendance().await;
        assert_eq!(summary.cleared, vec!["Door A".to_string()]);
        assert_eq!(summary.failed, vec!["Door B".to_string()]);
    }

    #[tokio::test]
    async fn slow_fetch_does_not_block_other_devices() {
        let connector = MockConnector::new();
        connector.add_terminal(
            "10.0.0.5",
            MockTerminal {
                op_delay: std::time::Duration::from_secs(5),
                ..MockTerminal::default()
            },
        );
        connector.add_terminal("10.0.0.6", MockTerminal::default());
        let (link, _sink) = link_with(connector);
        assert!(link.connect(&device(1, "Door A", "10.0.0.5")).await);
        assert!(link.connect(&device(2, "Door B", "10.0.0.6")).await);

        // Door A is stuck in device I/O; Door B must still be reachable.
        let slow_link = link.clone();
        let slow = tokio::spawn(async move { slow_link.list_users(DeviceId(1)).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let fast = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            link.list_users(DeviceId(2)),
        )
        .await;
        assert!(fast.is_ok());
        slow.abort();
    }
}
