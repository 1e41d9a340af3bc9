//! Terminal data types shared across the link, discovery and reconciler.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Device;

use super::protocol::TerminalError;

/// Privilege level for a normal user (terminal-protocol-defined).
pub const PRIVILEGE_USER: u16 = 0;
/// Privilege level for a terminal administrator.
pub const PRIVILEGE_ADMIN: u16 = 14;

/// A person enrolled on a terminal. Never persisted locally; always
/// fetched live from the device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteUser {
    /// Terminal-local identity; may differ from the business personnel id.
    pub uid: u16,
    pub name: String,
    pub privilege: u16,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub group_id: String,
    /// External user id as enrolled on the terminal (often the business
    /// personnel id). Empty when not set.
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub card: String,
}

impl RemoteUser {
    /// Build a terminal user from personnel data. The terminal protocol
    /// requires a numeric uid; a non-numeric personnel id is a reported,
    /// non-fatal error at the call site.
    pub fn from_personnel(personnel_id: &str, full_name: &str) -> Result<Self, TerminalError> {
        let uid = parse_uid(personnel_id)?;
        Ok(Self {
            uid,
            name: full_name.to_string(),
            privilege: PRIVILEGE_USER,
            password: String::new(),
            group_id: String::new(),
            user_id: personnel_id.trim().to_string(),
            card: String::new(),
        })
    }
}

/// Convert a user-facing id into the integer type the protocol requires.
pub fn parse_uid(raw: &str) -> Result<u16, TerminalError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| TerminalError::InvalidUserId(raw.to_string()))
}

/// One punch event as reported by a terminal. Ephemeral: fetched per sync
/// cycle, never persisted; the terminal is the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawAttendance {
    pub uid: u16,
    /// Separate external user id, when the terminal reports one.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Device-local clock, naive (no timezone attached). Missing when the
    /// terminal returned an unparseable time field.
    pub timestamp: Option<NaiveDateTime>,
    pub status: u16,
}

/// Human-readable text for a punch status code.
pub fn status_text(status: u16) -> String {
    match status {
        0 => "check-in".to_string(),
        1 => "check-out".to_string(),
        2 => "break-start".to_string(),
        3 => "break-end".to_string(),
        4 => "shift-start".to_string(),
        5 => "shift-end".to_string(),
        other => format!("unknown({})", other),
    }
}

/// Human-readable text for a privilege code.
pub fn privilege_text(privilege: u16) -> String {
    match privilege {
        PRIVILEGE_USER => "user".to_string(),
        PRIVILEGE_ADMIN => "administrator".to_string(),
        other => format!("unknown({})", other),
    }
}

/// Connection parameters handed to the protocol backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub ip: String,
    pub port: u16,
    pub timeout: Duration,
    pub password: u32,
    pub force_udp: bool,
}

impl From<&Device> for ConnectOptions {
    fn from(device: &Device) -> Self {
        Self {
            ip: device.ip.clone(),
            port: device.port,
            timeout: Duration::from_secs(device.timeout),
            password: device.password,
            force_udp: device.force_udp,
        }
    }
}
