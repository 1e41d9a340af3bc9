//! Persisted JSON configuration
//!
//! Single flat config file holding the device catalog and all settings,
//! loaded on startup and rewritten synchronously after every mutation.
//! A missing or unreadable file falls back to defaults (and writes them
//! out); a failed save is logged but never fails the in-memory update.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Canonical device key. Parsed once at the boundary; all internal lookups
/// are by id, never by mixed string/number comparison.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for DeviceId {
    fn from(id: u32) -> Self {
        DeviceId(id)
    }
}

impl FromStr for DeviceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(DeviceId)
    }
}

/// One configured terminal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    #[serde(default)]
    pub id: DeviceId,
    pub name: String,
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Transport hint shown in the UI; the link layer negotiates TCP first
    /// unless `force_udp` is set.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub password: u32,
    #[serde(default)]
    pub force_udp: bool,
}

fn default_port() -> u16 {
    4370
}

fn default_protocol() -> String {
    "TCP".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub auto_connect: bool,
    pub refresh_interval: u64,
    pub log_level: String,
    pub default_timeout: u64,
    pub default_port: u16,
    pub scan_threads: usize,
    pub api_settings: ApiSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_connect: true,
            refresh_interval: 60,
            log_level: "INFO".to_string(),
            default_timeout: 30,
            default_port: 4370,
            scan_threads: 50,
            api_settings: ApiSettings::default(),
        }
    }
}

/// HR backend integration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub enabled: bool,
    pub token_url: String,
    pub data_url: String,
    pub personnel_url: String,
    pub username: String,
    pub password: String,
    pub auto_send: bool,
    /// Fixed delay between push cycles, in seconds.
    pub send_interval: u64,
    pub personnel_page_size: u32,
    /// Clear attendance on every connected device after a confirmed push.
    pub clear_device_on_success: bool,
    pub token_data: TokenData,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            token_url: "https://erp.aaro.com.tr/Token".to_string(),
            data_url: "https://erp.aaro.com.tr/api/attendance".to_string(),
            personnel_url: "https://erp.aaro.com.tr/api/Personel".to_string(),
            username: String::new(),
            password: String::new(),
            auto_send: false,
            send_interval: 300,
            personnel_page_size: 100,
            clear_device_on_success: false,
            token_data: TokenData::default(),
        }
    }
}

/// Persisted bearer token so restarts reuse a still-valid token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry as `%Y-%m-%d %H:%M:%S` local time; empty when no
    /// token is stored.
    pub expires_at: String,
    pub token_type: String,
}

impl Default for TokenData {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            refresh_token: String::new(),
            expires_at: String::new(),
            token_type: "bearer".to_string(),
        }
    }
}

/// Root of the persisted config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub devices: Vec<Device>,
    pub settings: Settings,
}

/// Loads, mutates and persists the config file.
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
    /// High-water mark for device id assignment; never decreased on delete
    /// so ids are not reused within this store's lifetime.
    next_id: u32,
}

/// Shared handle used across the fleet, token manager and scheduler.
pub type SharedConfig = Arc<Mutex<ConfigStore>>;

impl ConfigStore {
    /// Load the config file, creating it with defaults when missing or
    /// unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = match Self::read_file(&path) {
            Ok(Some(config)) => config,
            Ok(None) => {
                let config = Config::default();
                if let Err(e) = Self::write_file(&path, &config) {
                    log::error!("[config] failed to write default config: {}", e);
                }
                config
            }
            Err(e) => {
                log::error!("[config] failed to load {}: {}", path.display(), e);
                Config::default()
            }
        };

        let next_id = config
            .devices
            .iter()
            .map(|d| d.id.0)
            .max()
            .unwrap_or(0)
            + 1;

        Self {
            path,
            config,
            next_id,
        }
    }

    /// Wrap into the shared handle used by the other components.
    pub fn into_shared(self) -> SharedConfig {
        Arc::new(Mutex::new(self))
    }

    fn read_file(path: &Path) -> Result<Option<Config>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn write_file(path: &Path, config: &Config) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(config)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Persist the current state. Failures are logged and swallowed: the
    /// in-memory state is authoritative for the rest of the session.
    fn persist(&self) {
        if let Err(e) = Self::write_file(&self.path, &self.config) {
            log::error!("[config] failed to save {}: {}", self.path.display(), e);
        }
    }

    /// Re-read the file, discarding unsaved in-memory state.
    pub fn reload(&mut self) {
        match Self::read_file(&self.path) {
            Ok(Some(config)) => {
                self.next_id = self.next_id.max(
                    config.devices.iter().map(|d| d.id.0).max().unwrap_or(0) + 1,
                );
                self.config = config;
            }
            Ok(None) => {}
            Err(e) => log::error!("[config] reload failed: {}", e),
        }
    }

    // --- device catalog ---

    pub fn devices(&self) -> &[Device] {
        &self.config.devices
    }

    /// Add a device, assigning the next id. Returns the assigned id.
    pub fn add_device(&mut self, mut device: Device) -> DeviceId {
        device.id = DeviceId(self.next_id);
        self.next_id += 1;
        self.config.devices.push(device);
        self.persist();
        DeviceId(self.next_id - 1)
    }

    /// Replace the device with the given id, preserving the id. Returns
    /// whether a matching device was found.
    pub fn update_device(&mut self, id: DeviceId, mut device: Device) -> bool {
        for slot in &mut self.config.devices {
            if slot.id == id {
                device.id = id;
                *slot = device;
                self.persist();
                return true;
            }
        }
        false
    }

    /// Remove the device with the given id. Callers that may hold a live
    /// connection for the id must disconnect first; `Fleet::remove_device`
    /// does both.
    pub fn delete_device(&mut self, id: DeviceId) -> bool {
        let before = self.config.devices.len();
        self.config.devices.retain(|d| d.id != id);
        let removed = self.config.devices.len() != before;
        if removed {
            self.persist();
        }
        removed
    }

    pub fn device_by_id(&self, id: DeviceId) -> Option<&Device> {
        self.config.devices.iter().find(|d| d.id == id)
    }

    /// Look up a device by display name. Names are not enforced unique:
    /// the first match wins, and new code should prefer [`device_by_id`].
    ///
    /// [`device_by_id`]: Self::device_by_id
    pub fn device_by_name(&self, name: &str) -> Option<&Device> {
        self.config.devices.iter().find(|d| d.name == name)
    }

    // --- settings ---

    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    pub fn api_settings(&self) -> ApiSettings {
        self.config.settings.api_settings.clone()
    }

    pub fn update_settings(&mut self, settings: Settings) {
        self.config.settings = settings;
        self.persist();
    }

    pub fn update_api_settings(&mut self, api_settings: ApiSettings) {
        self.config.settings.api_settings = api_settings;
        self.persist();
    }

    /// Overwrite only the persisted token.
    pub fn update_token_data(&mut self, token_data: TokenData) {
        self.config.settings.api_settings.token_data = token_data;
        self.persist();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device(name: &str, ip: &str) -> Device {
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

    fn temp_store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json"));
        (dir, store)
    }

    #[test]
    fn creates_default_config_file() {
        let (dir, store) = temp_store();
        assert!(dir.path().join("config.json").exists());
        assert!(store.devices().is_empty());
        assert!(store.settings().auto_connect);
        assert_eq!(store.settings().default_port, 4370);
        assert_eq!(store.settings().scan_threads, 50);
    }

    #[test]
    fn added_device_round_trips_by_id() {
        let (_dir, mut store) = temp_store();
        let id = store.add_device(sample_device("Door A", "10.0.0.5"));
        let found = store.device_by_id(id).unwrap();
        assert_eq!(found.name, "Door A");
        assert_eq!(found.ip, "10.0.0.5");
        assert_eq!(found.id, id);
    }

    #[test]
    fn ids_are_strictly_increasing_and_never_reused() {
        let (_dir, mut store) = temp_store();
        let a = store.add_device(sample_device("A", "10.0.0.1"));
        let b = store.add_device(sample_device("B", "10.0.0.2"));
        assert!(b > a);

        // Deleting the newest device must not free its id.
        assert!(store.delete_device(b));
        let c = store.add_device(sample_device("C", "10.0.0.3"));
        assert!(c > b);
    }

    #[test]
    fn update_preserves_id_and_reports_match() {
        let (_dir, mut store) = temp_store();
        let id = store.add_device(sample_device("Door A", "10.0.0.5"));

        let mut edited = sample_device("Door A (lobby)", "10.0.0.6");
        edited.id = DeviceId(999); // ignored: id is preserved from the slot
        assert!(store.update_device(id, edited));

        let found = store.device_by_id(id).unwrap();
        assert_eq!(found.name, "Door A (lobby)");
        assert_eq!(found.ip, "10.0.0.6");

        assert!(!store.update_device(DeviceId(42), sample_device("X", "10.0.0.7")));
    }

    #[test]
    fn name_lookup_returns_first_match() {
        let (_dir, mut store) = temp_store();
        let first = store.add_device(sample_device("Door", "10.0.0.5"));
        store.add_device(sample_device("Door", "10.0.0.6"));

        assert_eq!(store.device_by_name("Door").unwrap().id, first);
        assert!(store.device_by_name("Window").is_none());
    }

    #[test]
    fn persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let id = {
            let mut store = ConfigStore::load(&path);
            let mut settings = store.settings().clone();
            settings.api_settings.enabled = true;
            settings.api_settings.username = "hr-sync".to_string();
            store.update_settings(settings);
            store.add_device(sample_device("Door A", "10.0.0.5"))
        };

        let store = ConfigStore::load(&path);
        assert_eq!(store.devices().len(), 1);
        assert_eq!(store.device_by_id(id).unwrap().name, "Door A");
        assert!(store.api_settings().enabled);
        assert_eq!(store.api_settings().username, "hr-sync");
    }

    #[test]
    fn token_data_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        {
            let mut store = ConfigStore::load(&path);
            store.update_token_data(TokenData {
                access_token: "abc123".to_string(),
                refresh_token: "def456".to_string(),
                expires_at: "2025-06-01 12:00:00".to_string(),
                token_type: "bearer".to_string(),
            });
        }

        let store = ConfigStore::load(&path);
        let token = store.api_settings().token_data;
        assert_eq!(token.access_token, "abc123");
        assert_eq!(token.expires_at, "2025-06-01 12:00:00");
    }
}
