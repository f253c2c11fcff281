//! Chatroom configuration and lifecycle state.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use teahaz_poll::PollConfig;
use tracing::warn;

// ---------------------------------------------------------------------------
// DispatchConfig
// ---------------------------------------------------------------------------

/// Settings for the request dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Requests allowed on the wire at once; further dispatches wait for a
    /// slot. Default: 32.
    pub max_in_flight: usize,

    /// Deadline for a single request. Default: 30 s.
    pub timeout: Duration,

    /// Sent as `User-Agent` on every request.
    pub user_agent: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 32,
            timeout: Duration::from_secs(30),
            user_agent: format!("teahaz.rs-v{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DispatchConfig {
    /// Clamp out-of-range values so the config is safe to use.
    pub fn validated(mut self) -> Self {
        if self.max_in_flight == 0 {
            warn!("max_in_flight is 0, allowing one request at a time");
            self.max_in_flight = 1;
        }
        if self.timeout.is_zero() {
            let fallback = Self::default().timeout;
            warn!(
                timeout_secs = fallback.as_secs(),
                "request timeout is 0, using default"
            );
            self.timeout = fallback;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// TransferConfig
// ---------------------------------------------------------------------------

/// Settings for chunked file transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Largest *encoded* chunk the server accepts per request.
    /// Default: 1 MiB.
    pub upload_cap_bytes: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            upload_cap_bytes: 1 << 20,
        }
    }
}

impl TransferConfig {
    pub const MIN_UPLOAD_CAP: usize = 8;

    pub fn validated(mut self) -> Self {
        if self.upload_cap_bytes < Self::MIN_UPLOAD_CAP {
            warn!(
                cap = self.upload_cap_bytes,
                min = Self::MIN_UPLOAD_CAP,
                "upload cap below minimum, clamping"
            );
            self.upload_cap_bytes = Self::MIN_UPLOAD_CAP;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// ChatroomConfig
// ---------------------------------------------------------------------------

/// Everything a chatroom can be tuned with. Loadable from JSON; missing
/// fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatroomConfig {
    pub poll: PollConfig,
    pub dispatch: DispatchConfig,
    pub transfer: TransferConfig,
}

impl ChatroomConfig {
    pub fn validated(self) -> Self {
        Self {
            poll: self.poll.validated(),
            dispatch: self.dispatch.validated(),
            transfer: self.transfer.validated(),
        }
    }
}

// ---------------------------------------------------------------------------
// ChatroomState
// ---------------------------------------------------------------------------

/// Whether a chatroom's poll task is running.
///
/// ```text
/// Idle ──(subscribe message event)──→ Polling ──(stop)──→ Stopped
///   └────────────────────(stop)───────────────────────────────┘
/// ```
///
/// `Stopped` is final: subscribing afterwards registers the callback but
/// does not restart polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatroomState {
    Idle,
    Polling,
    Stopped,
}

impl ChatroomState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for ChatroomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dispatch_config_identifies_client() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.max_in_flight, 32);
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert!(cfg.user_agent.starts_with("teahaz.rs-v"));
    }

    #[test]
    fn test_validated_fixes_zero_values() {
        let cfg = ChatroomConfig {
            dispatch: DispatchConfig {
                max_in_flight: 0,
                timeout: Duration::ZERO,
                ..Default::default()
            },
            transfer: TransferConfig { upload_cap_bytes: 3 },
            ..Default::default()
        }
        .validated();

        assert_eq!(cfg.dispatch.max_in_flight, 1);
        assert_eq!(cfg.dispatch.timeout, Duration::from_secs(30));
        assert_eq!(cfg.transfer.upload_cap_bytes, TransferConfig::MIN_UPLOAD_CAP);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ChatroomState::Idle.to_string(), "idle");
        assert_eq!(ChatroomState::Polling.to_string(), "polling");
        assert_eq!(ChatroomState::Stopped.to_string(), "stopped");
        assert!(ChatroomState::Stopped.is_stopped());
    }
}
