//! Terminal communication module
//!
//! Typed operations and connection lifecycle for ZKTeco attendance
//! terminals. The wire protocol itself lives behind the connector traits
//! in [`protocol`]; the fleet only ever speaks through that seam.

pub mod link;
pub mod mock;
pub mod protocol;
pub mod types;

pub use link::{ClearSummary, TerminalLink};
pub use mock::{MockConnector, MockTerminal};
pub use protocol::{TerminalConnector, TerminalError, TerminalSession};
pub use types::{
    privilege_text, status_text, ConnectOptions, RawAttendance, RemoteUser, PRIVILEGE_ADMIN,
    PRIVILEGE_USER,
};
