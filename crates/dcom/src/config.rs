//! Registry configuration

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{DcomError, Result};
use crate::{DEFAULT_PING_PERIOD_SECS, DEFAULT_PING_TIMEOUT_PERIODS};

/// Settings for a [`crate::Registry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Resolver listener address; port 0 picks an ephemeral port
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Period of the outbound ping task
    #[serde(default = "default_ping_interval")]
    pub ping_interval: Duration,

    /// Period of the expiry sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: Duration,

    /// An exported OID with no ping for this long is expired
    #[serde(default = "default_expiry_window")]
    pub expiry_window: Duration,

    /// Whether the expiry sweep runs at all
    #[serde(default)]
    pub sweep_enabled: bool,

    /// Deadline for one outbound ping RPC
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: Duration,

    /// Largest inbound resolver frame, header excluded
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn default_ping_interval() -> Duration {
    Duration::from_secs(4 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(8 * 60)
}

fn default_expiry_window() -> Duration {
    Duration::from_secs(DEFAULT_PING_PERIOD_SECS * DEFAULT_PING_TIMEOUT_PERIODS as u64)
}

fn default_ping_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_frame_len() -> usize {
    64 * 1024
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            ping_interval: default_ping_interval(),
            sweep_interval: default_sweep_interval(),
            expiry_window: default_expiry_window(),
            sweep_enabled: false,
            ping_timeout: default_ping_timeout(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl RegistryConfig {
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_expiry_window(mut self, window: Duration) -> Self {
        self.expiry_window = window;
        self
    }

    pub fn with_sweep_enabled(mut self, enabled: bool) -> Self {
        self.sweep_enabled = enabled;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Reject settings the periodic tasks cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ping_interval.is_zero() {
            return Err(DcomError::InvalidConfig("ping_interval cannot be 0".into()));
        }
        if self.sweep_enabled && self.sweep_interval.is_zero() {
            return Err(DcomError::InvalidConfig(
                "sweep_interval cannot be 0 when the sweep is enabled".into(),
            ));
        }
        if self.ping_timeout.is_zero() {
            return Err(DcomError::InvalidConfig("ping_timeout cannot be 0".into()));
        }
        if self.max_frame_len < 2 {
            return Err(DcomError::InvalidConfig(
                "max_frame_len must leave room for the opnum".into(),
            ));
        }
        Ok(())
    }
}
