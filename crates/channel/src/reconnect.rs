//! Bounded reconnection policy for channel connections.
//!
//! This is the only retry logic in the engine: upper layers observe
//! connection state, never retry mechanics. When a scope's connection
//! drops (or fails to open), [`connect_with_retry`] keeps trying up to
//! a fixed attempt ceiling, then gives up and leaves the scope closed
//! until the caller explicitly reopens it.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ChannelClient, ChannelConnection};

/// Tunable parameters for the reconnection policy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of connect attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure. `1.0`
    /// keeps the delay fixed.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    /// Five attempts, three seconds apart.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(3),
            multiplier: 1.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Attempt to connect a scope's channel, retrying up to the ceiling.
///
/// Returns `Some(connection)` once an attempt succeeds, or `None` when
/// the attempt ceiling is exhausted or the `cancel` token is triggered.
pub async fn connect_with_retry(
    client: &ChannelClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<ChannelConnection> {
    let mut delay = config.initial_delay;

    for attempt in 1..=config.max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(
                    project_id = %client.project_id(),
                    "Connect cancelled",
                );
                return None;
            }
            result = client.connect() => {
                match result {
                    Ok(conn) => {
                        if attempt > 1 {
                            tracing::info!(
                                project_id = %client.project_id(),
                                attempt,
                                "Reconnected to project channel",
                            );
                        }
                        return Some(conn);
                    }
                    Err(e) => {
                        tracing::warn!(
                            project_id = %client.project_id(),
                            attempt,
                            error = %e,
                            "Connect attempt failed",
                        );
                    }
                }
            }
        }

        // Wait before the next attempt, respecting cancellation.
        if attempt < config.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_delay(delay, config);
        }
    }

    tracing::warn!(
        project_id = %client.project_id(),
        max_attempts = config.max_attempts,
        "Retry ceiling reached, leaving channel closed",
    );
    None
}
