//! Connection state machine and reconnect controller.
//!
//! Transitions: `connecting → open`, `open → closed`,
//! `closed → reconnecting → connecting` (loop), `closed/reconnecting →
//! logged_out` (terminal), `* → failed` (terminal, attempts exhausted),
//! `* → shutdown` (terminal, caller-initiated). `open` resets the attempt
//! counter. Reconnection never propagates an error to the caller; a
//! failed attempt re-enters the scheduler.

use crate::config::ReconnectPolicy;
use crate::errors::SocketonError;
use crate::events::{ErrorContext, SessionEventHandler};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

/// Connectivity status of a session. Exactly one value holds at any
/// instant; event data rides on the variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
    Reconnecting { attempt: u32, delay: Duration },
    PairingRequested,
    PairingReady { code: String },
    LoggedOut,
    Failed { attempts: u32 },
    Shutdown,
}

/// Backoff delay for attempt `k`: `min(base * 2^k, cap)`. Monotonically
/// non-decreasing in `k`, saturating instead of overflowing.
pub fn backoff_delay(attempt: u32, policy: &ReconnectPolicy) -> Duration {
    let base_ms = policy.base_delay.as_millis() as u64;
    let max_ms = policy.max_delay.as_millis() as u64;
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

#[derive(Debug)]
struct ReconnectState {
    attempts: u32,
    /// At-most-one concurrent reconnect sequence.
    in_progress: bool,
    last_delay: Option<Duration>,
    /// Cleared on terminal logout; no further automatic reconnection for
    /// this session instance.
    enabled: bool,
}

/// Owns connectivity status and the bounded-backoff reconnect loop.
pub struct ReconnectController {
    policy: ReconnectPolicy,
    state: Mutex<ReconnectState>,
    status: Mutex<ConnectionStatus>,
    handler: Arc<dyn SessionEventHandler>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ReconnectController {
    pub fn new(
        policy: ReconnectPolicy,
        handler: Arc<dyn SessionEventHandler>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            policy,
            state: Mutex::new(ReconnectState {
                attempts: 0,
                in_progress: false,
                last_delay: None,
                enabled: true,
            }),
            status: Mutex::new(ConnectionStatus::Connecting),
            handler,
            shutdown_rx,
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.status.lock().await.clone()
    }

    pub async fn attempts(&self) -> u32 {
        self.state.lock().await.attempts
    }

    pub async fn last_delay(&self) -> Option<Duration> {
        self.state.lock().await.last_delay
    }

    /// Publish a status change. After `Shutdown` the machine accepts no
    /// further transitions; observation stays available.
    pub async fn set_status(&self, status: ConnectionStatus) {
        {
            let mut current = self.status.lock().await;
            if *current == ConnectionStatus::Shutdown {
                return;
            }
            *current = status.clone();
        }
        self.handler.on_connection(status).await;
    }

    /// Successful open: reset the attempt counter regardless of prior count.
    pub async fn on_open(&self) {
        {
            let mut state = self.state.lock().await;
            state.attempts = 0;
            state.in_progress = false;
        }
        info!("connection opened");
        self.set_status(ConnectionStatus::Open).await;
    }

    /// Terminal logout: reset the counter and disable further automatic
    /// reconnection for this instance.
    pub async fn on_logged_out(&self) {
        {
            let mut state = self.state.lock().await;
            state.attempts = 0;
            state.enabled = false;
        }
        error!("session logged out; delete the session credentials and restart");
        self.set_status(ConnectionStatus::LoggedOut).await;
    }

    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            state.enabled = false;
            state.attempts = 0;
        }
        self.set_status(ConnectionStatus::Shutdown).await;
    }

    /// Run the reconnect schedule until the transport reconnects, the
    /// attempt ceiling is hit, or shutdown intervenes. A no-op when a
    /// reconnect sequence is already in progress.
    pub async fn schedule_reconnect(&self, transport: Arc<dyn Transport>) {
        loop {
            let (attempt, delay) = {
                let mut state = self.state.lock().await;
                if !state.enabled || state.in_progress || *self.shutdown_rx.borrow() {
                    return;
                }
                if state.attempts >= self.policy.max_attempts {
                    let attempts = state.attempts;
                    state.attempts = 0;
                    // Terminal for this instance: a new session is required
                    // to retry further.
                    state.enabled = false;
                    drop(state);
                    error!(attempts, "max reconnect attempts reached, giving up");
                    self.set_status(ConnectionStatus::Failed { attempts }).await;
                    return;
                }
                state.in_progress = true;
                let delay = backoff_delay(state.attempts, &self.policy);
                state.last_delay = Some(delay);
                (state.attempts + 1, delay)
            };

            info!(
                attempt,
                max = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );
            self.set_status(ConnectionStatus::Reconnecting { attempt, delay })
                .await;

            let mut shutdown = self.shutdown_rx.clone();
            if *shutdown.borrow() {
                self.state.lock().await.in_progress = false;
                return;
            }
            tokio::select! {
                _ = shutdown.changed() => {
                    self.state.lock().await.in_progress = false;
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            {
                let mut state = self.state.lock().await;
                state.attempts += 1;
                state.in_progress = false;
            }

            info!("attempting to reconnect");
            match transport.reconnect().await {
                Ok(()) => return,
                Err(e) => {
                    // Reconnection is this controller's own responsibility:
                    // report the failure and re-enter the scheduler instead
                    // of propagating.
                    warn!(error = %e, "reconnect failed");
                    let err = SocketonError::Transport(e.to_string());
                    self.handler
                        .on_error(&err, ErrorContext::Reconnect { attempt })
                        .await;
                }
            }
        }
    }
}
