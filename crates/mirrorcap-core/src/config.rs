//! Configuration types for mirrorcap

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the supervisor reacts to orientation events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Restart only when the new orientation differs from the current one
    #[default]
    OnChange,
    /// Restart on every orientation event
    Always,
}

impl std::str::FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "on-change" | "change" => Ok(RestartPolicy::OnChange),
            "always" => Ok(RestartPolicy::Always),
            _ => Err(format!("Invalid restart policy: {}. Use: on-change, always", s)),
        }
    }
}

/// Reconnect policy for the capture session's socket loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Consecutive failed attempts before giving up (`None` retries forever)
    pub max_attempts: Option<u32>,
    /// Delay after the first failure
    pub initial_backoff_ms: u64,
    /// Upper bound for the delay
    pub max_backoff_ms: u64,
    /// Growth factor applied per failed attempt
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(50),
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, forever
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1,
        }
    }

    /// Delay to wait before retrying after `attempt` consecutive failures
    /// (1-based), or `None` once attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        let exponent = attempt.saturating_sub(1).min(32);
        let factor = (self.multiplier.max(1) as u64).saturating_pow(exponent);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms.max(self.initial_backoff_ms));
        Some(Duration::from_millis(delay))
    }
}

/// Main configuration for a capture stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Host side of the forwarded endpoint
    pub host: String,
    /// Local forwarded port (0 picks a free port)
    pub port: u16,
    /// Abstract socket name the agent listens on
    pub socket_name: String,
    /// Device directory holding the agent binary and its library
    pub agent_dir: String,
    /// Agent binary and process name
    pub agent_name: String,
    /// Virtual to real size ratio, in (0, 1]
    pub scale: f32,
    /// Wait after launching the agent before forwarding
    pub agent_startup_delay_ms: u64,
    /// How long to wait for the first orientation event
    pub first_orientation_timeout_ms: u64,
    /// Bounds of the randomized delay after a rotation restart
    pub restart_jitter_ms: (u64, u64),
    /// Restart behaviour on orientation events
    pub restart_policy: RestartPolicy,
    /// Socket reconnect policy
    pub retry: RetryPolicy,
    /// Largest accepted frame payload in bytes
    pub max_frame_size: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            socket_name: "minicap".to_string(),
            agent_dir: "/data/local/tmp".to_string(),
            agent_name: "minicap".to_string(),
            scale: 1.0,
            agent_startup_delay_ms: 500,
            first_orientation_timeout_ms: 1_000,
            restart_jitter_ms: (10, 110),
            restart_policy: RestartPolicy::OnChange,
            retry: RetryPolicy::default(),
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

impl CaptureConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Builder pattern: set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder pattern: set scale
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Builder pattern: set agent startup delay
    pub fn with_agent_startup_delay(mut self, delay: Duration) -> Self {
        self.agent_startup_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Builder pattern: set first orientation timeout
    pub fn with_first_orientation_timeout(mut self, timeout: Duration) -> Self {
        self.first_orientation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder pattern: set restart jitter bounds
    pub fn with_restart_jitter(mut self, min: Duration, max: Duration) -> Self {
        self.restart_jitter_ms = (min.as_millis() as u64, max.as_millis() as u64);
        self
    }

    /// Builder pattern: set restart policy
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Builder pattern: set retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builder pattern: set max frame size
    pub fn with_max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn agent_startup_delay(&self) -> Duration {
        Duration::from_millis(self.agent_startup_delay_ms)
    }

    pub fn first_orientation_timeout(&self) -> Duration {
        Duration::from_millis(self.first_orientation_timeout_ms)
    }

    /// Full path of the agent binary on the device
    pub fn agent_path(&self) -> String {
        format!("{}/{}", self.agent_dir, self.agent_name)
    }

    /// Shell prefix that runs the agent with its library path set
    pub fn agent_command(&self) -> String {
        format!("LD_LIBRARY_PATH={} {}", self.agent_dir, self.agent_path())
    }

    /// Remote end of the port forward
    pub fn remote_socket(&self) -> String {
        format!("localabstract:{}", self.socket_name)
    }

    /// Check invariants that would otherwise surface as runtime failures
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size == 0 {
            return Err(Error::Config("max_frame_size must be non-zero".into()));
        }
        if !(self.scale > 0.0 && self.scale <= 1.0) {
            return Err(Error::Config(format!("scale must be in (0, 1], got {}", self.scale)));
        }
        if self.restart_jitter_ms.0 > self.restart_jitter_ms.1 {
            return Err(Error::Config(format!(
                "restart jitter bounds are inverted: {:?}",
                self.restart_jitter_ms
            )));
        }
        if self.retry.multiplier == 0 {
            return Err(Error::Config("retry multiplier must be at least 1".into()));
        }
        if self.socket_name.is_empty() || self.agent_name.is_empty() {
            return Err(Error::Config("socket and agent names must be set".into()));
        }
        Ok(())
    }
}
