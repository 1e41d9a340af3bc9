//! pdks-bridge
//!
//! Fleet manager for ZKTeco biometric attendance terminals: a persisted
//! device catalog, subnet discovery, a live connection table with typed
//! device operations, reconciliation of raw punches into canonical
//! records, and delivery of those records to an HR backend behind an
//! OAuth password grant.
//!
//! The vendor wire protocol sits behind the [`terminal::TerminalConnector`]
//! trait; [`terminal::MockConnector`] provides an in-memory backend for
//! tests and demo runs.

pub mod api;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod fleet;
pub mod reconcile;
pub mod scheduler;
pub mod terminal;

pub use config::{ApiSettings, ConfigStore, Device, DeviceId, Settings, SharedConfig, TokenData};
pub use error::{Error, Result};
pub use events::{ConnectionEvent, EventCategory, EventStatus, LogSink, ProgressFn};
pub use fleet::Fleet;
pub use reconcile::{AttendanceEntry, CanonicalRecord, Reconciler};
pub use scheduler::{PushResult, SyncScheduler};
