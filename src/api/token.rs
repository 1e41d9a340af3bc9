//! Bearer token lifecycle.
//!
//! Acquires a token with the password grant, persists it alongside an
//! absolute expiry so restarts reuse a still-valid token, and proactively
//! refreshes it once 80% of its lifetime has elapsed. Validity always
//! keeps a 5 minute safety margin before the declared expiry. Token
//! fields are mutex-guarded: the refresh timer and on-demand callers run
//! concurrently.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::config::{ConfigStore, SharedConfig, TokenData};
use crate::events::{ConnectionEvent, EventCategory, EventStatus, LogSink};

use super::client::{ApiClient, TokenResponse};

/// Safety margin: a token is treated as invalid this long before expiry.
const VALIDITY_MARGIN_SECS: i64 = 300;
/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_LIFETIME_SECS: u64 = 3600;
/// Delay before the first acquisition at startup, letting the rest of the
/// application settle before any network call.
const STARTUP_FETCH_DELAY: Duration = Duration::from_secs(2);
/// Format of the persisted expiry timestamp.
const EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Proactive refresh fires at 80% of the token lifetime.
pub(crate) fn refresh_delay(expires_in: u64) -> Duration {
    Duration::from_secs(expires_in.saturating_mul(4) / 5)
}

fn valid_at(expires_at: NaiveDateTime, now: NaiveDateTime) -> bool {
    now < expires_at - chrono::Duration::seconds(VALIDITY_MARGIN_SECS)
}

/// First 20 characters of the token for log output. The token is an
/// opaque string, so truncation must respect character boundaries.
fn token_preview(token: &str) -> String {
    let mut preview: String = token.chars().take(20).collect();
    if preview.len() < token.len() {
        preview.push_str("...");
    }
    preview
}

/// Reportable token state for the settings UI.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenStatus {
    Missing,
    Expired,
    ExpiringSoon { remaining_secs: i64 },
    Valid { remaining_secs: i64 },
}

#[derive(Default)]
struct TokenState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<NaiveDateTime>,
}

impl TokenState {
    fn status_at(&self, now: NaiveDateTime) -> TokenStatus {
        let Some(expires_at) = self.expires_at.filter(|_| self.access_token.is_some()) else {
            return TokenStatus::Missing;
        };
        let remaining_secs = (expires_at - now).num_seconds();
        if remaining_secs <= 0 {
            TokenStatus::Expired
        } else if remaining_secs <= VALIDITY_MARGIN_SECS {
            TokenStatus::ExpiringSoon { remaining_secs }
        } else {
            TokenStatus::Valid { remaining_secs }
        }
    }
}

/// Owns the bearer token and its background refresh timer.
pub struct TokenManager {
    config: SharedConfig,
    client: ApiClient,
    sink: Arc<dyn LogSink>,
    state: Mutex<TokenState>,
    refresh_task: Mutex<Option<tokio::task::AbortHandle>>,
    /// Self-handle for the background refresh task.
    this: Weak<TokenManager>,
}

impl TokenManager {
    pub fn new(config: SharedConfig, sink: Arc<dyn LogSink>) -> Arc<Self> {
        Self::with_client(config, ApiClient::new(), sink)
    }

    pub fn with_client(config: SharedConfig, client: ApiClient, sink: Arc<dyn LogSink>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            client,
            sink,
            state: Mutex::new(TokenState::default()),
            refresh_task: Mutex::new(None),
            this: this.clone(),
        })
    }

    fn lock_config(&self) -> MutexGuard<'_, ConfigStore> {
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
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

    /// Startup: reuse a persisted, still-valid token without a network
    /// call; otherwise schedule a delayed first acquisition. Must run on
    /// the tokio runtime.
    pub fn initialize(&self) {
        let settings = self.lock_config().api_settings();
        if !settings.enabled {
            return;
        }
        if self.load_saved_token() {
            log::info!("[api] reusing persisted token");
        } else {
            log::info!("[api] no valid persisted token, scheduling acquisition");
            let Some(manager) = self.this.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                tokio::time::sleep(STARTUP_FETCH_DELAY).await;
                manager.acquire_token().await;
            });
        }
    }

    /// Load the persisted token. A stored expiry at or before now means
    /// the token is treated as absent.
    pub fn load_saved_token(&self) -> bool {
        let token_data = self.lock_config().api_settings().token_data;
        if token_data.access_token.is_empty() || token_data.expires_at.is_empty() {
            return false;
        }
        let Ok(expires_at) = NaiveDateTime::parse_from_str(&token_data.expires_at, EXPIRY_FORMAT)
        else {
            log::warn!("[api] persisted token has unparseable expiry, ignoring");
            return false;
        };
        let now = chrono::Local::now().naive_local();
        if now >= expires_at {
            log::info!("[api] persisted token is expired");
            return false;
        }

        let remaining = (expires_at - now).num_seconds().max(0) as u64;
        {
            let mut state = self.lock_state();
            state.access_token = Some(token_data.access_token);
            state.refresh_token =
                Some(token_data.refresh_token).filter(|t| !t.is_empty());
            state.expires_at = Some(expires_at);
        }
        self.schedule_refresh(remaining);
        self.emit(
            "Token Load",
            EventStatus::Success,
            format!(
                "persisted token loaded\nvalid until: {}\nremaining: {}s",
                token_data.expires_at, remaining
            ),
        );
        true
    }

    /// Acquire a fresh token from the backend. Requires the integration to
    /// be enabled and credentials configured; every failure path reports a
    /// distinct message and returns `None`.
    pub async fn acquire_token(&self) -> Option<String> {
        let settings = self.lock_config().api_settings();
        if !settings.enabled {
            self.emit(
                "Token Acquisition",
                EventStatus::Failure,
                "integration disabled".to_string(),
            );
            return None;
        }
        if settings.username.is_empty() || settings.password.is_empty() {
            log::error!("[api] token requested without configured credentials");
            self.emit(
                "Token Acquisition",
                EventStatus::Failure,
                "username or password missing".to_string(),
            );
            return None;
        }

        self.emit(
            "Token Acquisition",
            EventStatus::Attempting,
            format!("url: {}\nuser: {}", settings.token_url, settings.username),
        );

        match self
            .client
            .request_token(&settings.token_url, &settings.username, &settings.password)
            .await
        {
            Ok(response) => {
                let expires_in = response.expires_in.unwrap_or(DEFAULT_LIFETIME_SECS);
                let expires_at = chrono::Local::now().naive_local()
                    + chrono::Duration::seconds(expires_in as i64);
                {
                    let mut state = self.lock_state();
                    state.access_token = Some(response.access_token.clone());
                    state.refresh_token = response.refresh_token.clone();
                    state.expires_at = Some(expires_at);
                }
                self.persist_token(&response, expires_at);
                self.schedule_refresh(expires_in);

                log::info!("[api] token acquired, lifetime {}s", expires_in);
                self.emit(
                    "Token Acquisition",
                    EventStatus::Success,
                    format!(
                        "token: {}\nlifetime: {}s",
                        token_preview(&response.access_token),
                        expires_in
                    ),
                );
                Some(response.access_token)
            }
            Err(e) => {
                log::error!("[api] token acquisition failed: {}", e);
                self.emit("Token Acquisition", EventStatus::Failure, e);
                None
            }
        }
    }

    fn persist_token(&self, response: &TokenResponse, expires_at: NaiveDateTime) {
        self.lock_config().update_token_data(TokenData {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone().unwrap_or_default(),
            expires_at: expires_at.format(EXPIRY_FORMAT).to_string(),
            token_type: response
                .token_type
                .clone()
                .unwrap_or_else(|| "bearer".to_string()),
        });
    }

    /// Drop the persisted and in-memory token.
    pub fn clear_saved_token(&self) {
        self.lock_config().update_token_data(TokenData::default());
        let mut state = self.lock_state();
        state.access_token = None;
        state.refresh_token = None;
        state.expires_at = None;
        log::info!("[api] saved token cleared");
    }

    /// True iff a token exists and now is before expiry minus the safety
    /// margin. Callers must acquire a token themselves when this is false;
    /// there is no implicit refresh here.
    pub fn is_valid(&self) -> bool {
        let state = self.lock_state();
        match (state.access_token.as_ref(), state.expires_at) {
            (Some(_), Some(expires_at)) => {
                valid_at(expires_at, chrono::Local::now().naive_local())
            }
            _ => false,
        }
    }

    pub fn current_token(&self) -> Option<String> {
        self.lock_state().access_token.clone()
    }

    pub fn token_status(&self) -> TokenStatus {
        self.lock_state().status_at(chrono::Local::now().naive_local())
    }

    /// Arm (or re-arm) the proactive refresh at 80% of the lifetime. The
    /// fired refresh is fire-and-forget: a failed refresh does not re-arm
    /// itself, the next push attempt falls back to reactive acquisition.
    fn schedule_refresh(&self, expires_in: u64) {
        let delay = refresh_delay(expires_in);
        let Some(manager) = self.this.upgrade() else {
            return;
        };
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            log::info!("[api] proactive token refresh firing");
            manager.emit(
                "Automatic Token Refresh",
                EventStatus::Attempting,
                "token lifetime at 80%, refreshing".to_string(),
            );
            if manager.acquire_token().await.is_some() {
                manager.emit(
                    "Automatic Token Refresh",
                    EventStatus::Success,
                    "token refreshed".to_string(),
                );
            } else {
                manager.emit(
                    "Automatic Token Refresh",
                    EventStatus::Failure,
                    "token refresh failed".to_string(),
                );
            }
        });

        let mut slot = self
            .refresh_task
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(task.abort_handle());
        log::info!("[api] token refresh scheduled in {}s", delay.as_secs());
    }

    /// Cancel any pending refresh. Safe to call repeatedly and with no
    /// timer armed.
    pub fn stop(&self) {
        let mut slot = self
            .refresh_task
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.take() {
            task.abort();
            log::info!("[api] token refresh timer cancelled");
        }
    }
}

impl Drop for TokenManager {
    fn drop(&mut self) {
        self.stop();
    }
}
