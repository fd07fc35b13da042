//! The [`GenerationJob`] state machine.
//!
//! A job is the unit of tracked asynchronous work: one media-generation
//! request executing out of process. Transitions are monotonic --
//! `Pending -> Processing -> Completed | Failed` -- and terminal states
//! are sticky: once a job is `Completed` or `Failed`, only an explicit
//! [`reset`](GenerationJob::reset) mutates it again. Every mutator
//! returns whether it actually changed the job, so duplicate event
//! delivery is observable as a no-op.

use serde::{Deserialize, Serialize};

use crate::types::{ProjectId, RequestId, Timestamp};

/// Lifecycle status of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created but not yet submitted to a provider.
    Pending,
    /// Submitted; the provider is working on it.
    Processing,
    /// Finished successfully. `result_url` is set.
    Completed,
    /// Finished with an error. `error` is set.
    Failed,
}

impl JobStatus {
    /// `Completed` and `Failed` are terminal: no event moves a job out
    /// of them, only an explicit reset.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Best-effort mapping of a free-form wire status string onto the
    /// closest known status.
    ///
    /// Used for events of an unrecognized kind that still carry a
    /// `status` field. Unknown strings map to `None` and the event is
    /// ignored.
    pub fn from_wire(value: &str) -> Option<JobStatus> {
        match value.to_ascii_lowercase().as_str() {
            "pending" | "queued" | "created" => Some(JobStatus::Pending),
            "processing" | "running" | "in_progress" | "generating" => Some(JobStatus::Processing),
            "completed" | "complete" | "done" | "succeeded" | "success" => {
                Some(JobStatus::Completed)
            }
            "failed" | "error" | "errored" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// One tracked unit of asynchronous generation work.
///
/// Serializes with camelCase field names; the serialized form is the
/// descriptor blob embedded in transcript messages and artifact
/// documents, so the serde representation is part of the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    /// Primary correlation key.
    pub project_id: ProjectId,
    /// Secondary correlation key, set once the start-API responds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<RequestId>,
    pub status: JobStatus,
    /// Completion percentage (0-100).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub progress: Option<u8>,
    /// Set only on `Completed`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_url: Option<String>,
    /// Set only on `Failed`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    /// Stamped on every applied transition.
    pub last_updated: Timestamp,
}

impl GenerationJob {
    /// Create a fresh `Pending` job correlated to `project_id`.
    pub fn new(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            request_id: None,
            status: JobStatus::Pending,
            progress: None,
            result_url: None,
            error: None,
            last_updated: chrono::Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Enter `Processing` (optimistically, before the start-API call
    /// resolves, or on the first progress event). No-op when terminal
    /// or already processing.
    pub fn set_processing(&mut self) -> bool {
        if self.is_terminal() || self.status == JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Processing;
        self.touch();
        true
    }

    /// Record a progress update. Clamped to 0-100; implies
    /// `Processing`. Ignored once terminal.
    pub fn record_progress(&mut self, percent: u8) -> bool {
        if self.is_terminal() {
            return false;
        }
        let percent = percent.min(100);
        if self.status == JobStatus::Processing && self.progress == Some(percent) {
            return false;
        }
        self.status = JobStatus::Processing;
        self.progress = Some(percent);
        self.touch();
        true
    }

    /// Transition to `Completed` with the result URL. Ignored once
    /// terminal, which makes duplicate completion events no-ops.
    pub fn complete(&mut self, result_url: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.result_url = Some(result_url.into());
        self.progress = Some(100);
        self.error = None;
        self.touch();
        true
    }

    /// Transition to `Failed` with a user-visible error message.
    /// Ignored once terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.result_url = None;
        self.touch();
        true
    }

    /// Best-effort status coercion for events of an unrecognized kind.
    ///
    /// Transitions stay monotonic: the only coercion allowed is
    /// `Pending -> Processing`. A bare status string never carries a
    /// result URL or error message, so it never drives a terminal
    /// transition, and it never moves a job backwards either.
    pub fn coerce_status(&mut self, status: JobStatus) -> bool {
        if self.status != JobStatus::Pending || status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Processing;
        self.touch();
        true
    }

    /// Return to a fresh `Pending` with all optional fields cleared.
    /// The only way out of a terminal state.
    pub fn reset(&mut self) {
        self.request_id = None;
        self.status = JobStatus::Pending;
        self.progress = None;
        self.result_url = None;
        self.error = None;
        self.touch();
    }

    fn touch(&mut self) {
        self.last_updated = chrono::Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processing_job() -> GenerationJob {
        let mut job = GenerationJob::new("p1");
        job.set_processing();
        job
    }

    #[test]
    fn new_job_is_pending_and_empty() {
        let job = GenerationJob::new("p1");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.request_id.is_none());
        assert!(job.progress.is_none());
        assert!(job.result_url.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn progress_implies_processing() {
        let mut job = GenerationJob::new("p1");
        assert!(job.record_progress(40));
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, Some(40));
    }

    #[test]
    fn progress_clamps_to_100() {
        let mut job = processing_job();
        assert!(job.record_progress(250));
        assert_eq!(job.progress, Some(100));
    }

    #[test]
    fn complete_sets_url_and_full_progress() {
        let mut job = processing_job();
        assert!(job.complete("https://x/img.png"));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_url.as_deref(), Some("https://x/img.png"));
        assert_eq!(job.progress, Some(100));
        assert!(job.error.is_none());
    }

    #[test]
    fn fail_sets_error_and_clears_url() {
        let mut job = processing_job();
        assert!(job.fail("out of memory"));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("out of memory"));
        assert!(job.result_url.is_none());
    }

    #[test]
    fn terminal_guard_blocks_all_mutators() {
        let mut job = processing_job();
        job.complete("https://x/a.png");
        let before = job.clone();

        assert!(!job.record_progress(10));
        assert!(!job.set_processing());
        assert!(!job.fail("late error"));
        assert!(!job.complete("https://x/b.png"));
        assert!(!job.coerce_status(JobStatus::Processing));

        // Nothing moved, not even the timestamp.
        assert_eq!(job, before);
    }

    #[test]
    fn duplicate_complete_is_a_noop() {
        let mut job = processing_job();
        assert!(job.complete("https://x/img.png"));
        let after_first = job.clone();
        assert!(!job.complete("https://x/img.png"));
        assert_eq!(job, after_first);
    }

    #[test]
    fn reset_is_the_only_way_out_of_terminal() {
        let mut job = processing_job();
        job.fail("boom");
        job.reset();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error.is_none());
        assert!(job.request_id.is_none());
        assert!(job.progress.is_none());
    }

    #[test]
    fn coerce_status_never_enters_terminal() {
        let mut job = GenerationJob::new("p1");
        assert!(!job.coerce_status(JobStatus::Completed));
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.coerce_status(JobStatus::Processing));
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn coerce_status_never_moves_backwards() {
        let mut job = processing_job();
        assert!(!job.coerce_status(JobStatus::Pending));
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn from_wire_maps_known_aliases() {
        assert_eq!(JobStatus::from_wire("queued"), Some(JobStatus::Pending));
        assert_eq!(JobStatus::from_wire("RUNNING"), Some(JobStatus::Processing));
        assert_eq!(JobStatus::from_wire("done"), Some(JobStatus::Completed));
        assert_eq!(JobStatus::from_wire("error"), Some(JobStatus::Failed));
        assert_eq!(JobStatus::from_wire("weird"), None);
    }

    #[test]
    fn descriptor_round_trips_through_serde() {
        let mut job = GenerationJob::new("p1");
        job.request_id = Some("r1".into());
        job.complete("https://x/img.png");

        let blob = serde_json::to_string(&job).unwrap();
        assert!(blob.contains("\"projectId\":\"p1\""));
        assert!(blob.contains("\"requestId\":\"r1\""));
        assert!(blob.contains("\"status\":\"completed\""));

        let parsed: GenerationJob = serde_json::from_str(&blob).unwrap();
        assert_eq!(parsed, job);
    }

    #[test]
    fn serialization_is_deterministic() {
        let mut job = GenerationJob::new("p1");
        job.complete("https://x/img.png");
        let a = serde_json::to_string(&job).unwrap();
        let b = serde_json::to_string(&job).unwrap();
        assert_eq!(a, b);
    }
}
