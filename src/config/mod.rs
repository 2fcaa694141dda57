use crate::errors::SocketonError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);
pub const PAIRING_GRACE_PERIOD: Duration = Duration::from_secs(3);

const PAIRING_CODE_LEN: usize = 8;

/// Reconnect backoff policy. Delay for attempt `k` is
/// `min(base_delay * 2^k, max_delay)`; after `max_attempts` consecutive
/// failures the session transitions to `Failed` and stops retrying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: BASE_RECONNECT_DELAY,
            max_delay: MAX_RECONNECT_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Opt-in auto-follow sweep: after the session starts, follow each listed
/// channel sequentially, sleeping `delay` between follows. Per-entry
/// failures are reported through the error callback and do not abort the
/// sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoFollowConfig {
    pub jids: Vec<String>,
    #[serde(default)]
    pub delay: Duration,
}

/// Immutable session configuration resolved at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Storage location for session credentials.
    #[serde(rename = "sessionDir")]
    pub session_dir: PathBuf,
    /// Target phone identifier used for pairing-code requests.
    #[serde(rename = "pairingNumber")]
    pub pairing_number: String,
    /// Optional fixed pairing code. Must be exactly 8 characters when set.
    #[serde(default, rename = "pairingCode")]
    pub pairing_code: Option<String>,
    #[serde(default = "default_true", rename = "enableAutoReconnect")]
    pub auto_reconnect: bool,
    #[serde(default = "default_true", rename = "enableMetadataCache")]
    pub metadata_cache: bool,
    #[serde(default, rename = "syncFullHistory")]
    pub sync_full_history: bool,
    /// Timeout applied to every outbound query. Exceeding it surfaces as a
    /// transport error, not as a reconnect trigger.
    #[serde(default = "default_query_timeout", rename = "queryTimeout")]
    pub query_timeout: Duration,
    /// Grace period before requesting a pairing code, letting the transport
    /// socket settle.
    #[serde(default = "default_pairing_grace", rename = "pairingGrace")]
    pub pairing_grace: Duration,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    #[serde(default, rename = "autoFollow")]
    pub auto_follow: Option<AutoFollowConfig>,
}

fn default_true() -> bool {
    true
}

fn default_query_timeout() -> Duration {
    DEFAULT_QUERY_TIMEOUT
}

fn default_pairing_grace() -> Duration {
    PAIRING_GRACE_PERIOD
}

impl SessionConfig {
    pub fn new(session_dir: impl Into<PathBuf>, pairing_number: impl Into<String>) -> Self {
        Self {
            session_dir: session_dir.into(),
            pairing_number: pairing_number.into(),
            pairing_code: None,
            auto_reconnect: true,
            metadata_cache: true,
            sync_full_history: false,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            pairing_grace: PAIRING_GRACE_PERIOD,
            reconnect: ReconnectPolicy::default(),
            auto_follow: None,
        }
    }

    /// Validate startup parameters. Called synchronously at session
    /// construction; any violation is fatal.
    pub fn validate(&self) -> Result<(), SocketonError> {
        if self.session_dir.as_os_str().is_empty() {
            return Err(SocketonError::Config("sessionDir is required".into()));
        }
        if self.pairing_number.trim().is_empty() {
            return Err(SocketonError::Config("pairingNumber is required".into()));
        }
        if let Some(code) = &self.pairing_code {
            if code.chars().count() != PAIRING_CODE_LEN {
                return Err(SocketonError::Config(format!(
                    "pairingCode must be {} characters long",
                    PAIRING_CODE_LEN
                )));
            }
        }
        Ok(())
    }
}
