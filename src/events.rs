//! Structured connection log events.
//!
//! Every terminal and backend operation reports its outcome through an
//! injected [`LogSink`] so the embedding application (UI log view, file
//! logger, test harness) can render a consistent operation log. Sinks must
//! never block and never fail the operation that emitted the event.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Callback for human-readable progress lines ("Door A: connected (2/3)").
/// Invoked in completion order, which is unspecified across devices.
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Outcome classification for a logged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Attempting,
    Success,
    Failure,
    Warning,
    Info,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventStatus::Attempting => "attempting",
            EventStatus::Success => "success",
            EventStatus::Failure => "failure",
            EventStatus::Warning => "warning",
            EventStatus::Info => "info",
        };
        f.write_str(s)
    }
}

/// Category tag for grouping events in the log view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Connection,
    DataFetch,
    DataManagement,
    Api,
    General,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventCategory::Connection => "connection",
            EventCategory::DataFetch => "data-fetch",
            EventCategory::DataManagement => "data-management",
            EventCategory::Api => "api",
            EventCategory::General => "general",
        };
        f.write_str(s)
    }
}

/// One structured log entry: which device, which operation, how it went.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// Display name of the device, or "API Server" for backend operations.
    pub device: String,
    pub operation: String,
    pub status: EventStatus,
    /// Free-text detail, may span multiple lines (raw payloads included).
    pub detail: String,
    pub category: EventCategory,
}

/// Receiver for [`ConnectionEvent`]s.
///
/// Implementations must be cheap and infallible; an event is advisory and
/// is never the only signal of failure (operations also return outcomes).
pub trait LogSink: Send + Sync {
    fn log(&self, event: ConnectionEvent);
}

/// Sink that discards all events.
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _event: ConnectionEvent) {}
}

/// Adapter turning a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> LogSink for FnSink<F>
where
    F: Fn(ConnectionEvent) + Send + Sync,
{
    fn log(&self, event: ConnectionEvent) {
        (self.0)(event);
    }
}

/// Sink that buffers events in memory (log view backing store, tests).
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<ConnectionEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events received so far.
    pub fn snapshot(&self) -> Vec<ConnectionEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Drain all buffered events.
    pub fn take(&self) -> Vec<ConnectionEvent> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn log(&self, event: ConnectionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
