//! Sync scheduler
//!
//! Drives periodic and on-demand delivery of canonical attendance
//! records to the HR backend. The auto-send loop is fixed-delay: the
//! configured interval is re-armed after each cycle finishes, so drift
//! accumulates by the duration of the push itself. Disabling auto-send
//! mid-run does not cancel an armed tick; the tick fires, observes the
//! flag, performs no work and re-arms. Batches are not deduplicated
//! between cycles: every cycle ships everything currently present on the
//! connected devices, and the optional clear-on-success is what prevents
//! resends.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;

use crate::api::client::ApiClient;
use crate::api::token::TokenManager;
use crate::config::{ConfigStore, SharedConfig};
use crate::events::{ConnectionEvent, EventCategory, EventStatus, LogSink};
use crate::reconcile::{CanonicalRecord, Reconciler};
use crate::terminal::ClearSummary;

/// Delay before the first automatic push, letting the token bootstrap
/// settle first.
const PUSH_BOOTSTRAP_DELAY: Duration = Duration::from_secs(30);

/// Narrow capability the scheduler needs from the device side: collect
/// the current batch, and clear devices after a confirmed delivery.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn collect(&self) -> Vec<CanonicalRecord>;
    async fn clear_connected(&self) -> ClearSummary;
}

#[async_trait]
impl RecordSource for Reconciler {
    async fn collect(&self) -> Vec<CanonicalRecord> {
        Reconciler::collect(self).await
    }

    async fn clear_connected(&self) -> ClearSummary {
        Reconciler::clear_connected(self).await
    }
}

/// Outcome of one push operation, reported to the caller and the log.
#[derive(Debug, Clone, PartialEq)]
pub struct PushResult {
    pub success: bool,
    pub message: String,
}

impl PushResult {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Owns the periodic push loop and the on-demand push path.
pub struct SyncScheduler {
    config: SharedConfig,
    token: Arc<TokenManager>,
    client: ApiClient,
    source: Arc<dyn RecordSource>,
    sink: Arc<dyn LogSink>,
    push_task: Mutex<Option<tokio::task::AbortHandle>>,
    /// Self-handle for the background push loop.
    this: Weak<SyncScheduler>,
}

impl SyncScheduler {
    pub fn new(
        config: SharedConfig,
        token: Arc<TokenManager>,
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn LogSink>,
    ) -> Arc<Self> {
        Self::with_client(config, token, ApiClient::new(), source, sink)
    }

    pub fn with_client(
        config: SharedConfig,
        token: Arc<TokenManager>,
        client: ApiClient,
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn LogSink>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            token,
            client,
            source,
            sink,
            push_task: Mutex::new(None),
            this: this.clone(),
        })
    }

    fn lock_config(&self) -> MutexGuard<'_, ConfigStore> {
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, operation: &str, status: EventStatus, detail: String) {
        self.sink.log(ConnectionEvent {
            device: "API Server".to_string(),
            operation: operation.to_string(),
            status,
            detail,
            category: EventCategory::Api,
        });
    }

    /// Push a record batch now. Short-circuits before any network call
    /// when the integration is disabled or the batch is empty; otherwise
    /// ensures a valid token (acquiring reactively if needed), delivers,
    /// and interprets the response.
    pub async fn push_now(&self, records: &[CanonicalRecord]) -> PushResult {
        let settings = self.lock_config().api_settings();
        if !settings.enabled {
            log::info!("[sync] push skipped: integration disabled");
            self.emit(
                "Data Push",
                EventStatus::Failure,
                "integration disabled".to_string(),
            );
            return PushResult::failure("integration disabled");
        }
        if records.is_empty() {
            self.emit(
                "Data Push",
                EventStatus::Info,
                "no records to send".to_string(),
            );
            return PushResult::failure("no records to send");
        }

        self.emit(
            "Data Push",
            EventStatus::Attempting,
            format!("url: {}\nrecords: {}", settings.data_url, records.len()),
        );

        if !self.token.is_valid() {
            log::info!("[sync] token invalid, acquiring a new one");
            if self.token.acquire_token().await.is_none() {
                self.emit(
                    "Data Push",
                    EventStatus::Failure,
                    "token unavailable".to_string(),
                );
                return PushResult::failure("token unavailable");
            }
        }
        let Some(token) = self.token.current_token() else {
            return PushResult::failure("token unavailable");
        };

        let outcome = self
            .client
            .push_attendance(&settings.data_url, &token, records)
            .await;
        let payload = serde_json::to_string_pretty(records).unwrap_or_default();

        if outcome.success {
            log::info!("[sync] {} records sent and processed", records.len());
            self.emit(
                "Data Push",
                EventStatus::Success,
                format!(
                    "{} records sent and processed\n\nSENT DATA:\n{}\n\nRESULT:\n{}",
                    records.len(),
                    payload,
                    outcome.detail
                ),
            );
            if settings.clear_device_on_success {
                self.clear_devices().await;
            }
            PushResult {
                success: true,
                message: format!("{} records sent and processed", records.len()),
            }
        } else {
            // Delivered-but-rejected is a warning (the backend answered);
            // transport and shape failures are hard failures.
            let status = if outcome.delivered {
                EventStatus::Warning
            } else {
                EventStatus::Failure
            };
            log::warn!("[sync] push failed: {}", outcome.detail);
            self.emit(
                "Data Push",
                status,
                format!(
                    "push failed: {}\n\nSENT DATA:\n{}",
                    outcome.detail, payload
                ),
            );
            PushResult::failure(outcome.detail)
        }
    }

    /// Best-effort clear of every connected device after a confirmed
    /// delivery. Per-device failures are logged; the push result already
    /// reported success and is not rolled back.
    async fn clear_devices(&self) {
        self.emit(
            "Device Cleanup",
            EventStatus::Attempting,
            "clearing device records after confirmed delivery".to_string(),
        );
        let summary = self.source.clear_connected().await;
        if summary.cleared.is_empty() {
            let detail = if summary.failed.is_empty() {
                "no connected devices to clear".to_string()
            } else {
                format!("no devices cleared; failed: {}", summary.failed.join(", "))
            };
            self.emit("Device Cleanup", EventStatus::Warning, detail);
        } else {
            let mut detail = format!("cleared: {}", summary.cleared.join(", "));
            if !summary.failed.is_empty() {
                detail.push_str(&format!("\nfailed: {}", summary.failed.join(", ")));
            }
            self.emit("Device Cleanup", EventStatus::Success, detail);
        }
    }

    /// One automatic tick: observe the flags, collect, push.
    pub async fn push_cycle(&self) {
        let settings = self.lock_config().api_settings();
        if !settings.enabled || !settings.auto_send {
            log::debug!("[sync] automatic push tick: disabled, no work");
            return;
        }

        self.emit(
            "Automatic Push",
            EventStatus::Attempting,
            "collecting records from connected devices".to_string(),
        );
        let records = self.source.collect().await;
        if records.is_empty() {
            self.emit(
                "Automatic Push",
                EventStatus::Info,
                "no new records found".to_string(),
            );
            return;
        }

        let result = self.push_now(&records).await;
        let status = if result.success {
            EventStatus::Success
        } else {
            EventStatus::Failure
        };
        self.emit(
            "Automatic Push",
            status,
            format!("{} records: {}", records.len(), result.message),
        );
    }

    /// Start the automatic push loop. No-op unless the integration and
    /// auto-send are both enabled at call time; a second `start` replaces
    /// the running loop.
    pub fn start(&self) {
        let settings = self.lock_config().api_settings();
        if !settings.enabled || !settings.auto_send {
            log::info!("[sync] automatic push not enabled");
            return;
        }

        log::info!(
            "[sync] automatic push started, interval {}s",
            settings.send_interval
        );
        self.emit(
            "Automatic Push",
            EventStatus::Info,
            format!("automatic push started, interval {}s", settings.send_interval),
        );

        let Some(scheduler) = self.this.upgrade() else {
            return;
        };
        let task = tokio::spawn(async move {
            tokio::time::sleep(PUSH_BOOTSTRAP_DELAY).await;
            loop {
                scheduler.push_cycle().await;
                // Fixed-delay re-arm; interval changes apply on the next
                // tick.
                let interval = scheduler.lock_config().api_settings().send_interval;
                tokio::time::sleep(Duration::from_secs(interval.max(1))).await;
            }
        });

        let mut slot = self.push_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(task.abort_handle());
    }

    /// Stop the automatic push loop. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut slot = self.push_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.take() {
            task.abort();
            log::info!("[sync] automatic push stopped");
            self.emit(
                "Automatic Push",
                EventStatus::Info,
                "automatic push stopped".to_string(),
            );
        }
    }

    /// Push a single synthetic record to verify the full pipeline.
    pub async fn send_test_record(&self) -> PushResult {
        let record = CanonicalRecord {
            device: "Test Device".to_string(),
            log_id: "999999".to_string(),
            personnel_id: "TEST001".to_string(),
            date: chrono::Local::now()
                .naive_local()
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        };
        self.push_now(&[record]).await
    }

    /// Verify backend connectivity by acquiring a token.
    pub async fn test_api_connection(&self) -> PushResult {
        if !self.lock_config().api_settings().enabled {
            return PushResult::failure("integration disabled");
        }
        match self.token.acquire_token().await {
            Some(_) => PushResult {
                success: true,
                message: "connection ok, token acquired".to_string(),
            },
            None => PushResult::failure("token acquisition failed"),
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
