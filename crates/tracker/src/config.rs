//! Engine configuration loaded from environment variables.

use std::time::Duration;

use medley_channel::multiplexer::ChannelConfig;
use medley_channel::reconnect::ReconnectConfig;

use crate::polling::PollConfig;

/// Engine configuration.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// WebSocket base URL for the streaming endpoint.
    pub ws_base_url: String,
    /// Start-job endpoint.
    pub start_endpoint: String,
    /// File-status endpoint (polling fallback).
    pub file_status_endpoint: String,
    /// Ceiling on a single WebSocket connect attempt, in seconds.
    pub connect_timeout_secs: u64,
    /// Delay between reconnect attempts, in seconds.
    pub reconnect_delay_secs: u64,
    /// Reconnect attempt ceiling.
    pub reconnect_max_attempts: u32,
    /// Delay between fallback point queries, in seconds.
    pub poll_interval_secs: u64,
    /// Ceiling on the total time spent polling, in seconds.
    pub poll_max_wait_secs: u64,
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                                |
    /// |--------------------------------|----------------------------------------|
    /// | `MEDLEY_WS_URL`                | `ws://localhost:3000`                  |
    /// | `MEDLEY_START_URL`             | `http://localhost:3000/api/generate`   |
    /// | `MEDLEY_FILE_STATUS_URL`       | `http://localhost:3000/api/files`      |
    /// | `MEDLEY_CONNECT_TIMEOUT_SECS`  | `30`                                   |
    /// | `MEDLEY_RECONNECT_DELAY_SECS`  | `3`                                    |
    /// | `MEDLEY_RECONNECT_MAX_ATTEMPTS`| `5`                                    |
    /// | `MEDLEY_POLL_INTERVAL_SECS`    | `3`                                    |
    /// | `MEDLEY_POLL_MAX_WAIT_SECS`    | `120`                                  |
    pub fn from_env() -> Self {
        Self {
            ws_base_url: env_or("MEDLEY_WS_URL", "ws://localhost:3000"),
            start_endpoint: env_or("MEDLEY_START_URL", "http://localhost:3000/api/generate"),
            file_status_endpoint: env_or(
                "MEDLEY_FILE_STATUS_URL",
                "http://localhost:3000/api/files",
            ),
            connect_timeout_secs: env_parsed("MEDLEY_CONNECT_TIMEOUT_SECS", 30),
            reconnect_delay_secs: env_parsed("MEDLEY_RECONNECT_DELAY_SECS", 3),
            reconnect_max_attempts: env_parsed("MEDLEY_RECONNECT_MAX_ATTEMPTS", 5),
            poll_interval_secs: env_parsed("MEDLEY_POLL_INTERVAL_SECS", 3),
            poll_max_wait_secs: env_parsed("MEDLEY_POLL_MAX_WAIT_SECS", 120),
        }
    }

    /// Channel-layer view of the configuration.
    pub fn channel_config(&self) -> ChannelConfig {
        let delay = Duration::from_secs(self.reconnect_delay_secs);
        ChannelConfig {
            ws_base_url: self.ws_base_url.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            reconnect: ReconnectConfig {
                max_attempts: self.reconnect_max_attempts,
                initial_delay: delay,
                max_delay: delay,
                multiplier: 1.0,
            },
        }
    }

    /// Polling-fallback view of the configuration.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_wait: Duration::from_secs(self.poll_max_wait_secs),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be a valid value: {e}")),
        Err(_) => default,
    }
}
