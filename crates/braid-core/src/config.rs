//! Client and session configuration
//!
//! Plain structs with documented defaults plus a `testing()` preset tuned
//! for fast deterministic suites. Session settings can be overridden per
//! dial through [`SessionOverrides`], a shallow field-wise merge where the
//! caller wins.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Client Configuration
// ----------------------------------------------------------------------------

/// Configuration for a multi-path client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Capacity of the application message channel.
    pub msg_chan_len: usize,
    /// TTL and reaper cadence for the inbound duplicate cache.
    pub msg_cache_expiration: Duration,
    /// Default settings for sessions opened by dial or accept.
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            msg_chan_len: 1024,
            msg_cache_expiration: Duration::from_secs(300), // 5 minutes
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Small buffers and short expirations for tests.
    pub fn testing() -> Self {
        Self {
            msg_chan_len: 64,
            msg_cache_expiration: Duration::from_millis(500),
            session: SessionConfig::testing(),
        }
    }
}

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Configuration for one reliable session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Largest data segment handed to a single subclient write.
    pub mtu: usize,
    /// How long an active open waits for the peer's handshake ack.
    pub dial_timeout: Duration,
    /// Write deadline applied to the subclient for each segment write.
    /// Zero disables the deadline.
    pub write_timeout: Duration,
    /// Capacity, in segments, of the in-order receive buffer.
    pub recv_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mtu: 1024,
            dial_timeout: Duration::from_secs(10),
            write_timeout: Duration::ZERO,
            recv_window: 256,
        }
    }
}

impl SessionConfig {
    /// Fast timeouts for tests.
    pub fn testing() -> Self {
        Self {
            mtu: 256,
            dial_timeout: Duration::from_secs(1),
            write_timeout: Duration::ZERO,
            recv_window: 64,
        }
    }

    /// Apply caller overrides on top of this configuration. Set fields win;
    /// unset fields keep the stored default.
    pub fn with_overrides(&self, overrides: &SessionOverrides) -> Self {
        Self {
            mtu: overrides.mtu.unwrap_or(self.mtu),
            dial_timeout: overrides.dial_timeout.unwrap_or(self.dial_timeout),
            write_timeout: overrides.write_timeout.unwrap_or(self.write_timeout),
            recv_window: overrides.recv_window.unwrap_or(self.recv_window),
        }
    }
}

/// Per-dial session overrides; `None` fields defer to the stored default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOverrides {
    pub mtu: Option<usize>,
    pub dial_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub recv_window: Option<usize>,
}
