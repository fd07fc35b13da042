//! Transcript message model and descriptor extraction.
//!
//! The conversation transcript itself is owned by the host UI; this
//! module only defines the message shape the reconciler operates on.
//! A message that is the placeholder for an in-flight job embeds a
//! serialized [`GenerationJob`] descriptor blob, discovered by
//! scanning at patch time -- there is no separate candidate store.

use serde::{Deserialize, Serialize};

use medley_core::job::GenerationJob;
use medley_core::types::{ProjectId, Timestamp};

/// One message in the conversation transcript, ordered oldest-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptMessage {
    pub id: String,
    /// Rendered message text. Opaque to the reconciler.
    pub body: String,
    /// Serialized [`GenerationJob`] blob for placeholder messages.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub descriptor: Option<String>,
    pub created_at: Timestamp,
}

impl TranscriptMessage {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            descriptor: None,
            created_at: chrono::Utc::now(),
        }
    }

    /// Attach a job descriptor, making this message a placeholder.
    pub fn with_job(mut self, job: &GenerationJob) -> Self {
        self.descriptor = serde_json::to_string(job).ok();
        self
    }

    /// Parse the embedded descriptor, if any.
    ///
    /// A malformed blob is treated as "no descriptor": the message is
    /// simply not a candidate.
    pub fn job(&self) -> Option<GenerationJob> {
        let blob = self.descriptor.as_deref()?;
        match serde_json::from_str(blob) {
            Ok(job) => Some(job),
            Err(e) => {
                tracing::debug!(
                    message_id = %self.id,
                    error = %e,
                    "Ignoring malformed job descriptor in transcript message",
                );
                None
            }
        }
    }

    /// Replace the embedded descriptor with a rewritten job.
    pub fn set_job(&mut self, job: &GenerationJob) {
        self.descriptor = serde_json::to_string(job).ok();
    }
}

/// Project ids of every job descriptor embedded in the transcript, in
/// order of first appearance. A conversation may reference several
/// jobs, e.g. after regenerating.
pub fn embedded_project_ids(messages: &[TranscriptMessage]) -> Vec<ProjectId> {
    let mut ids: Vec<ProjectId> = Vec::new();
    for message in messages {
        if let Some(job) = message.job() {
            if !job.project_id.is_empty() && !ids.contains(&job.project_id) {
                ids.push(job.project_id);
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use medley_core::job::JobStatus;

    #[test]
    fn job_round_trips_through_descriptor() {
        let mut job = GenerationJob::new("p1");
        job.request_id = Some("r1".into());
        job.set_processing();

        let message = TranscriptMessage::new("m1", "generating…").with_job(&job);
        let parsed = message.job().unwrap();
        assert_eq!(parsed.project_id, "p1");
        assert_eq!(parsed.request_id.as_deref(), Some("r1"));
        assert_eq!(parsed.status, JobStatus::Processing);
    }

    #[test]
    fn malformed_descriptor_is_not_a_candidate() {
        let mut message = TranscriptMessage::new("m1", "hello");
        message.descriptor = Some("{not valid".into());
        assert!(message.job().is_none());
    }

    #[test]
    fn plain_message_has_no_job() {
        assert!(TranscriptMessage::new("m1", "hello").job().is_none());
    }

    #[test]
    fn embedded_project_ids_dedupes_in_order() {
        let job_a = GenerationJob::new("p1");
        let job_b = GenerationJob::new("p2");
        let messages = vec![
            TranscriptMessage::new("m1", "").with_job(&job_a),
            TranscriptMessage::new("m2", "plain"),
            TranscriptMessage::new("m3", "").with_job(&job_b),
            TranscriptMessage::new("m4", "").with_job(&job_a),
        ];
        assert_eq!(embedded_project_ids(&messages), vec!["p1", "p2"]);
    }
}
