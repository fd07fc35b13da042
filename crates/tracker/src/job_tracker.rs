//! Per-job state machine driver.
//!
//! A [`JobTracker`] owns one [`GenerationJob`] and keeps it
//! consistent with inbound channel events scoped to it. Register
//! [`handler`](JobTracker::handler) on the scope's channel to feed it.

use std::future::Future;
use std::sync::{Arc, Mutex};

use medley_channel::dispatch::EventHandler;
use medley_channel::messages::{ChannelEvent, EventKind};
use medley_core::job::{GenerationJob, JobStatus};
use medley_core::scope::Scope;

use crate::start::{StartError, StartReceipt};

/// Tracks one generation job against the event stream.
pub struct JobTracker {
    state: Mutex<TrackerState>,
}

struct TrackerState {
    job: GenerationJob,
    /// `None` after `reset()`: detached, no event matches.
    scope: Option<Scope>,
}

impl JobTracker {
    /// Create a tracker armed with the conversation's id as its scope.
    /// The start call later narrows this to the exact request.
    pub fn new(conversation_id: impl Into<String>) -> Self {
        let conversation_id = conversation_id.into();
        Self {
            state: Mutex::new(TrackerState {
                job: GenerationJob::new(conversation_id.clone()),
                scope: Some(Scope::project(conversation_id)),
            }),
        }
    }

    /// Snapshot of the tracked job.
    pub fn job(&self) -> GenerationJob {
        self.lock().job.clone()
    }

    /// The current correlation scope, if attached.
    pub fn scope(&self) -> Option<Scope> {
        self.lock().scope.clone()
    }

    /// Start a job through the external start API.
    ///
    /// The job optimistically enters `Processing` before the call; on
    /// success the scope is re-keyed to the returned project id and
    /// narrowed to the request id (arming exact matching); on failure
    /// the job fails with the raised error message.
    pub async fn start<F, Fut>(&self, start_fn: F) -> Result<StartReceipt, StartError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StartReceipt, StartError>>,
    {
        self.lock().job.set_processing();

        match start_fn().await {
            Ok(receipt) => {
                let mut state = self.lock();
                state.job.project_id = receipt.project_id.clone();
                state.job.request_id = receipt.request_id.clone();

                let mut scope = Scope::project(receipt.project_id.clone());
                if let Some(request_id) = &receipt.request_id {
                    scope.narrow(request_id.clone());
                }
                state.scope = Some(scope);

                tracing::debug!(
                    project_id = %receipt.project_id,
                    "Job tracker armed with start receipt",
                );
                Ok(receipt)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Start call failed, job marked failed");
                self.lock().job.fail(e.to_string());
                Err(e)
            }
        }
    }

    /// Consume one inbound event.
    ///
    /// Events outside the current scope are silently ignored. Matching
    /// events map to validated transitions; the terminal guard in
    /// [`GenerationJob`] makes late or duplicate events no-ops.
    pub fn on_event(&self, event: &ChannelEvent) {
        let mut state = self.lock();
        let Some(scope) = state.scope.clone() else {
            return;
        };
        if !scope.accepts(event.project_id.as_deref(), event.request_id.as_deref()) {
            return;
        }

        match event.classify() {
            EventKind::Progress => match event.progress_percent() {
                Some(percent) => {
                    state.job.record_progress(percent);
                }
                None => {
                    state.job.set_processing();
                }
            },
            EventKind::File => match event.result_url() {
                Some(url) => {
                    state.job.complete(url);
                }
                // A file event always terminates the job; a result we
                // cannot attach terminates it as a failure, matching
                // the transcript reconciler.
                None => {
                    state.job.fail("unrecognized result type");
                }
            },
            EventKind::Error => {
                let message = event
                    .error
                    .clone()
                    .unwrap_or_else(|| "generation failed".to_string());
                state.job.fail(message);
            }
            EventKind::SubscribeAck => {}
            EventKind::Other => {
                // Degraded-but-safe default: an unrecognized kind that
                // still carries a status field is mapped best-effort.
                if let Some(status) = event.status.as_deref().and_then(JobStatus::from_wire) {
                    state.job.coerce_status(status);
                }
            }
        }
    }

    /// Complete the job out of band (polling fallback found the result).
    pub fn complete(&self, result_url: impl Into<String>) {
        self.lock().job.complete(result_url);
    }

    /// Fail the job out of band (start failure, polling timeout).
    pub fn fail(&self, message: impl Into<String>) {
        self.lock().job.fail(message);
    }

    /// Return the job to a fresh `Pending` and detach from the event
    /// stream. The only way out of a terminal state.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.job.reset();
        state.scope = None;
    }

    /// A channel handler feeding this tracker.
    pub fn handler(self: &Arc<Self>) -> EventHandler {
        let tracker = Arc::clone(self);
        Arc::new(move |event: &ChannelEvent| tracker.on_event(event))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use medley_channel::messages::parse_event;

    use super::*;

    fn file_event(project: &str, request: &str, url: &str) -> ChannelEvent {
        parse_event(&format!(
            r#"{{"type":"file","projectId":"{project}","requestId":"{request}","object":{{"url":"{url}","type":"image"}}}}"#
        ))
        .unwrap()
    }

    async fn started_tracker() -> JobTracker {
        let tracker = JobTracker::new("conv-1");
        tracker
            .start(|| async {
                Ok(StartReceipt {
                    project_id: "p1".to_string(),
                    request_id: Some("r1".to_string()),
                })
            })
            .await
            .unwrap();
        tracker
    }

    #[tokio::test]
    async fn start_arms_exact_scope() {
        let tracker = started_tracker().await;
        let job = tracker.job();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.project_id, "p1");
        assert_eq!(job.request_id.as_deref(), Some("r1"));
        assert_eq!(tracker.scope(), Some(Scope::request("p1", "r1")));
    }

    #[tokio::test]
    async fn start_failure_fails_the_job() {
        let tracker = JobTracker::new("conv-1");
        let result = tracker
            .start(|| async { Err(StartError::MissingIds) })
            .await;
        assert!(result.is_err());

        let job = tracker.job();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
    }

    #[tokio::test]
    async fn file_event_completes_the_job() {
        let tracker = started_tracker().await;
        tracker.on_event(&file_event("p1", "r1", "https://x/img.png"));

        let job = tracker.job();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_url.as_deref(), Some("https://x/img.png"));
        assert_eq!(job.progress, Some(100));
    }

    #[tokio::test]
    async fn duplicate_completion_changes_nothing() {
        let tracker = started_tracker().await;
        let event = file_event("p1", "r1", "https://x/img.png");
        tracker.on_event(&event);
        let after_first = tracker.job();
        tracker.on_event(&event);
        assert_eq!(tracker.job(), after_first);
    }

    #[tokio::test]
    async fn foreign_scope_events_are_ignored() {
        let tracker = started_tracker().await;
        tracker.on_event(&file_event("p9", "r9", "https://x/other.png"));

        let job = tracker.job();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.result_url.is_none());
    }

    #[tokio::test]
    async fn unrecognized_result_type_fails_the_job() {
        let tracker = started_tracker().await;
        tracker.on_event(
            &parse_event(
                r#"{"type":"file","projectId":"p1","requestId":"r1","object":{"url":"https://x/out.bin","type":"text"}}"#,
            )
            .unwrap(),
        );

        let job = tracker.job();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("unrecognized result type"));
        assert!(job.result_url.is_none());
    }

    #[tokio::test]
    async fn queued_status_does_not_regress_a_processing_job() {
        let tracker = started_tracker().await;
        tracker.on_event(
            &parse_event(r#"{"type":"job-update","projectId":"p1","status":"queued"}"#).unwrap(),
        );
        assert_eq!(tracker.job().status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn progress_after_completion_is_ignored() {
        let tracker = started_tracker().await;
        tracker.on_event(&file_event("p1", "r1", "https://x/img.png"));
        tracker.on_event(
            &parse_event(r#"{"type":"progress","projectId":"p1","progress":10.0}"#).unwrap(),
        );

        let job = tracker.job();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, Some(100));
    }

    #[tokio::test]
    async fn progress_event_updates_percentage() {
        let tracker = started_tracker().await;
        tracker.on_event(
            &parse_event(r#"{"type":"progress","projectId":"p1","requestId":"r1","progress":42.0}"#)
                .unwrap(),
        );
        assert_eq!(tracker.job().progress, Some(42));
    }

    #[tokio::test]
    async fn error_event_fails_the_job() {
        let tracker = started_tracker().await;
        tracker.on_event(
            &parse_event(r#"{"type":"error","projectId":"p1","error":"out of memory"}"#).unwrap(),
        );

        let job = tracker.job();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("out of memory"));
    }

    #[tokio::test]
    async fn unknown_kind_with_status_is_mapped_best_effort() {
        let tracker = started_tracker().await;
        tracker.on_event(
            &parse_event(r#"{"type":"job-update","projectId":"p1","status":"queued"}"#).unwrap(),
        );
        assert_eq!(tracker.job().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn reset_detaches_from_the_stream() {
        let tracker = started_tracker().await;
        tracker.reset();
        assert!(tracker.scope().is_none());
        assert_eq!(tracker.job().status, JobStatus::Pending);

        // Events for the old scope no longer apply.
        tracker.on_event(&file_event("p1", "r1", "https://x/img.png"));
        assert_eq!(tracker.job().status, JobStatus::Pending);
    }
}
