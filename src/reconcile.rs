//! Attendance reconciler
//!
//! Joins raw punch records with the terminal's user table to resolve a
//! business personnel identity, and normalizes punches into the canonical
//! shape the HR backend accepts. Pure map over the connected devices:
//! no retries, no caching, and a failure on one device never aborts the
//! others (the link already isolates fetch errors to empty lists plus a
//! failure event).

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::config::DeviceId;
use crate::terminal::types::{status_text, RawAttendance, RemoteUser};
use crate::terminal::TerminalLink;

/// Literal placeholder kept when a punch carries no usable timestamp.
const TIMESTAMP_PLACEHOLDER: &str = "{timestamp}";

/// The canonical punch record delivered to the HR backend. Serializes to
/// exactly the four backend keys; internal bookkeeping never lives here.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CanonicalRecord {
    #[serde(rename = "CihazID")]
    pub device: String,
    #[serde(rename = "CihazLogID")]
    pub log_id: String,
    #[serde(rename = "CihazPersonelID")]
    pub personnel_id: String,
    #[serde(rename = "Tarih")]
    pub date: String,
}

/// Enriched per-punch view for the embedding UI and export layers.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceEntry {
    pub device_id: DeviceId,
    pub device_name: String,
    /// Terminal log id (the raw record's uid field).
    pub log_id: u16,
    pub personnel_id: String,
    pub user_name: String,
    pub timestamp: Option<NaiveDateTime>,
    pub status: u16,
    pub status_text: String,
}

struct Identity {
    personnel_id: String,
    user_name: String,
}

/// Resolve the personnel identity for one raw punch.
///
/// Fallback chain: external user id matched against the user table, then
/// the punch's own uid, then a placeholder embedding the unresolved id.
fn resolve_identity(users: &[RemoteUser], raw: &RawAttendance) -> Identity {
    let external = raw
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if let Some(external) = external {
        if let Some(user) = users.iter().find(|u| u.uid.to_string() == external) {
            return Identity {
                personnel_id: user.uid.to_string(),
                user_name: user.name.clone(),
            };
        }
    }

    if let Some(user) = users.iter().find(|u| u.uid == raw.uid) {
        return Identity {
            personnel_id: user.uid.to_string(),
            user_name: user.name.clone(),
        };
    }

    let unresolved = external
        .map(str::to_string)
        .unwrap_or_else(|| raw.uid.to_string());
    Identity {
        personnel_id: format!("unknown({})", unresolved),
        user_name: format!("Unknown User (ID: {})", unresolved),
    }
}

fn format_date(device_name: &str, timestamp: Option<NaiveDateTime>) -> String {
    match timestamp {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => {
            // Field-level fallback: keep the literal template value rather
            // than dropping the record from the batch.
            log::warn!(
                "[reconcile] punch on {} has no usable timestamp, keeping placeholder",
                device_name
            );
            TIMESTAMP_PLACEHOLDER.to_string()
        }
    }
}

/// Collects and normalizes punches from every connected terminal.
pub struct Reconciler {
    link: Arc<TerminalLink>,
}

impl Reconciler {
    pub fn new(link: Arc<TerminalLink>) -> Self {
        Self { link }
    }

    /// Canonical records for every punch on every connected device,
    /// re-fetched live on each call. A device with no punches (or a fetch
    /// failure) simply contributes nothing.
    pub async fn collect(&self) -> Vec<CanonicalRecord> {
        let mut records = Vec::new();
        for device in self.link.connected_devices().await {
            let users = self.link.list_users(device.id).await;
            let punches = self.link.list_attendance(device.id).await;
            for raw in &punches {
                let identity = resolve_identity(&users, raw);
                records.push(CanonicalRecord {
                    device: device.name.clone(),
                    log_id: raw.uid.to_string(),
                    personnel_id: identity.personnel_id,
                    date: format_date(&device.name, raw.timestamp),
                });
            }
        }
        records
    }

    /// Enriched entries (resolved names, status text) for display/export.
    pub async fn collect_entries(&self) -> Vec<AttendanceEntry> {
        let mut entries = Vec::new();
        for device in self.link.connected_devices().await {
            let users = self.link.list_users(device.id).await;
            let punches = self.link.list_attendance(device.id).await;
            for raw in &punches {
                let identity = resolve_identity(&users, raw);
                entries.push(AttendanceEntry {
                    device_id: device.id,
                    device_name: device.name.clone(),
                    log_id: raw.uid,
                    personnel_id: identity.personnel_id,
                    user_name: identity.user_name,
                    timestamp: raw.timestamp,
                    status: raw.status,
                    status_text: status_text(raw.status),
                });
            }
        }
        entries
    }

    /// Clear punch records on every connected device (post-push cleanup).
    pub async fn clear_connected(&self) -> crate::terminal::ClearSummary {
        self.link.clear_all_attendance().await
    }
}
