//! Terminal SDK boundary.
//!
//! The binary ZKTeco wire protocol is an opaque dependency: the fleet
//! talks to devices exclusively through these traits, and a protocol
//! backend is injected at construction time. The in-memory backend in
//! [`super::mock`] drives the test suite and demo setups without hardware.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{ConnectOptions, RawAttendance, RemoteUser};

/// Errors at the protocol seam. The link layer converts all of these into
/// logged outcomes; they never propagate past it.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// Transport-level failure (connect refused, timeout, reset).
    #[error("connection failed: {0}")]
    Connect(String),

    /// Protocol-level failure on an established session.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation issued for a device with no live session.
    #[error("not connected")]
    NotConnected,

    /// User-facing id that does not fit the protocol's integer uid.
    #[error("invalid user id: {0}")]
    InvalidUserId(String),
}

/// Opens sessions against physical terminals.
#[async_trait]
pub trait TerminalConnector: Send + Sync {
    /// Perform the protocol handshake. A returned session owns the
    /// underlying transport until [`TerminalSession::disconnect`] or drop.
    async fn connect(&self, opts: &ConnectOptions) -> Result<Box<dyn TerminalSession>, TerminalError>;
}

/// One live protocol session with a terminal.
///
/// Operations take `&mut self`: a session is one connection handle and
/// callers issue one operation at a time per device.
#[async_trait]
pub trait TerminalSession: Send {
    async fn get_users(&mut self) -> Result<Vec<RemoteUser>, TerminalError>;

    async fn get_attendance(&mut self) -> Result<Vec<RawAttendance>, TerminalError>;

    /// Create or overwrite the user with `user.uid` on the terminal.
    async fn set_user(&mut self, user: &RemoteUser) -> Result<(), TerminalError>;

    async fn delete_user(&mut self, uid: u16) -> Result<(), TerminalError>;

    /// Wipe all stored punch records on the terminal.
    async fn clear_attendance(&mut self) -> Result<(), TerminalError>;

    /// Self-reported device name; `None` when the terminal does not expose
    /// one. Best-effort, used by discovery.
    async fn device_name(&mut self) -> Result<Option<String>, TerminalError>;

    async fn disconnect(&mut self) -> Result<(), TerminalError>;
}
