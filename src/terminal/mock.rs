//! In-memory protocol backend.
//!
//! Simulates a subnet of terminals keyed by IP address. State is shared
//! across sessions, so a `clear_attendance` from one session is visible to
//! the next connect, mirroring a real device. Used by the test suite and
//! usable for demo runs without hardware.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::protocol::{TerminalConnector, TerminalError, TerminalSession};
use super::types::{ConnectOptions, RawAttendance, RemoteUser};

/// Simulated terminal state.
#[derive(Debug, Clone, Default)]
pub struct MockTerminal {
    /// Self-reported device name (`None`: the device exposes no name).
    pub name: Option<String>,
    pub users: Vec<RemoteUser>,
    pub attendance: Vec<RawAttendance>,
    /// When set, sessions fail all data operations with a protocol error.
    pub fail_operations: bool,
    /// Simulated device latency applied to every session operation.
    pub op_delay: Duration,
}

/// Connector backed by a map of simulated terminals.
#[derive(Default)]
pub struct MockConnector {
    terminals: Mutex<HashMap<String, Arc<Mutex<MockTerminal>>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a terminal reachable at `ip`.
    pub fn add_terminal(&self, ip: &str, terminal: MockTerminal) {
        let mut terminals = self.terminals.lock().unwrap_or_else(|e| e.into_inner());
        terminals.insert(ip.to_string(), Arc::new(Mutex::new(terminal)));
    }

    /// Inspect a terminal's current state (e.g. after a clear).
    pub fn terminal(&self, ip: &str) -> Option<MockTerminal> {
        let terminals = self.terminals.lock().unwrap_or_else(|e| e.into_inner());
        terminals.get(ip).map(|t| t.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

#[async_trait]
impl TerminalConnector for MockConnector {
    async fn connect(
        &self,
        opts: &ConnectOptions,
    ) -> Result<Box<dyn TerminalSession>, TerminalError> {
        let terminal = {
            let terminals = self.terminals.lock().unwrap_or_else(|e| e.into_inner());
            terminals.get(&opts.ip).cloned()
        };
        match terminal {
            Some(state) => Ok(Box::new(MockSession { state })),
            None => Err(TerminalError::Connect(format!(
                "no route to {}:{}",
                opts.ip, opts.port
            ))),
        }
    }
}

struct MockSession {
    state: Arc<Mutex<MockTerminal>>,
}

impl MockSession {
    async fn check(&self) -> Result<(), TerminalError> {
        let (delay, fail) = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            (state.op_delay, state.fail_operations)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(TerminalError::Protocol("simulated device fault".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TerminalSession for MockSession {
    async fn get_users(&mut self) -> Result<Vec<RemoteUser>, TerminalError> {
        self.check().await?;
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).users.clone())
    }

    async fn get_attendance(&mut self) -> Result<Vec<RawAttendance>, TerminalError> {
        self.check().await?;
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).attendance.clone())
    }

    async fn set_user(&mut self, user: &RemoteUser) -> Result<(), TerminalError> {
        self.check().await?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = state.users.iter_mut().find(|u| u.uid == user.uid) {
            *existing = user.clone();
        } else {
            state.users.push(user.clone());
        }
        Ok(())
    }

    async fn delete_user(&mut self, uid: u16) -> Result<(), TerminalError> {
        self.check().await?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.users.retain(|u| u.uid != uid);
        Ok(())
    }

    async fn clear_attendance(&mut self) -> Result<(), TerminalError> {
        self.check().await?;
        self.state.lock().unwrap_or_else(|e| e.into_inner()).attendance.clear();
        Ok(())
    }

    async fn device_name(&mut self) -> Result<Option<String>, TerminalError> {
        self.check().await?;
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).name.clone())
    }

    async fn disconnect(&mut self) -> Result<(), TerminalError> {
        Ok(())
    }
}
