//! Point-query polling fallback.
//!
//! When a channel connection cannot be established (or delivers
//! nothing within the connect window), job status is re-checked with a
//! plain `GET <file_status_endpoint>/{id}` on a fixed interval, up to
//! a maximum total wait. A timed-out poll fails the job with a
//! user-visible message -- no job is left in `Processing` with no path
//! to a terminal state. [`run_channel_fallback`] is the supervisor
//! that arms the poller once a job's channel scope gives up.

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use medley_channel::multiplexer::ChannelMultiplexer;

use crate::job_tracker::JobTracker;

/// How often the fallback supervisor re-checks the channel scope.
const CHANNEL_RECHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Tunable parameters for the polling loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between point queries.
    pub interval: Duration,
    /// Ceiling on the total time spent polling.
    pub max_wait: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_wait: Duration::from_secs(120),
        }
    }
}

/// Errors from the polling fallback.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The HTTP request itself failed.
    #[error("Status request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The status endpoint returned a non-2xx status code.
    #[error("Status API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// No result within the maximum total wait.
    #[error("Generation timed out after {0:?} with no result")]
    TimedOut(Duration),

    /// Polling was cancelled (scope closed or teardown).
    #[error("Polling cancelled")]
    Cancelled,
}

/// HTTP client for the file-status endpoint.
pub struct FileStatusPoller {
    client: reqwest::Client,
    status_url: String,
}

impl FileStatusPoller {
    /// Create a poller for the status endpoint base URL, e.g.
    /// `http://host:3000/api/files`.
    pub fn new(status_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            status_url: status_url.into(),
        }
    }

    pub fn with_client(client: reqwest::Client, status_url: impl Into<String>) -> Self {
        Self {
            client,
            status_url: status_url.into(),
        }
    }

    /// Poll until the result URL is available, the wait ceiling is
    /// hit, or the token is cancelled.
    pub async fn poll_until_ready(
        &self,
        id: &str,
        config: &PollConfig,
        cancel: &CancellationToken,
    ) -> Result<String, PollError> {
        let started = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval(config.interval);
        // The first tick fires immediately; that gives us one prompt
        // check before the interval cadence starts.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                _ = ticker.tick() => {}
            }

            if started.elapsed() >= config.max_wait {
                tracing::warn!(id, max_wait_secs = config.max_wait.as_secs(), "Polling timed out");
                return Err(PollError::TimedOut(config.max_wait));
            }

            match self.query_once(id).await {
                Ok(Some(url)) => {
                    tracing::info!(id, url = %url, "Polling found result");
                    return Ok(url);
                }
                Ok(None) => {
                    tracing::debug!(id, "Result not ready yet");
                }
                Err(PollError::Api { status, ref body }) => {
                    // A broken status endpoint ends the wait; a 404
                    // just means "not ready" on some backends, keep going.
                    if status == 404 {
                        tracing::debug!(id, "Status endpoint has no record yet");
                    } else {
                        tracing::warn!(id, status, body = %body, "Status endpoint error");
                        return Err(PollError::Api {
                            status,
                            body: body.clone(),
                        });
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One point query. `Ok(None)` means the result is not ready yet.
    async fn query_once(&self, id: &str) -> Result<Option<String>, PollError> {
        let response = self
            .client
            .get(format!("{}/{}", self.status_url, id))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(PollError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        Ok(extract_result_url(&body))
    }
}

/// Supervise one tracked job's fallback path.
///
/// While the job's channel scope has a live connection task this just
/// idles. Once the scope gives up (retry ceiling exhausted, or the
/// scope was never opened) the status endpoint is polled and the job
/// is settled either way: a found result completes it, a poll error or
/// timeout fails it with a user-visible message.
///
/// Returns when the job reaches a terminal state, the tracker is
/// detached from the event stream, or `cancel` fires.
pub async fn run_channel_fallback(
    tracker: &JobTracker,
    mux: &ChannelMultiplexer,
    poller: &FileStatusPoller,
    config: &PollConfig,
    cancel: &CancellationToken,
) {
    loop {
        if tracker.job().is_terminal() {
            return;
        }
        let Some(scope) = tracker.scope() else {
            return;
        };
        if !mux.is_open(&scope.project_id).await {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(CHANNEL_RECHECK_INTERVAL) => {}
        }
    }

    let Some(scope) = tracker.scope() else {
        return;
    };
    tracing::info!(
        project_id = %scope.project_id,
        "Channel unavailable, falling back to polling",
    );

    match poller
        .poll_until_ready(&scope.project_id, config, cancel)
        .await
    {
        Ok(url) => tracker.complete(url),
        Err(PollError::Cancelled) => {}
        Err(e) => tracker.fail(e.to_string()),
    }
}

/// Pull the result URL out of a status response, whether it sits at
/// the top level or nested in the result object.
pub fn extract_result_url(body: &Value) -> Option<String> {
    let url = body
        .get("url")
        .or_else(|| body.get("object").and_then(|object| object.get("url")))
        .and_then(Value::as_str)?;
    if url.is_empty() {
        return None;
    }
    Some(url.to_string())
}
