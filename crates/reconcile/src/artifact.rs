//! Side-panel artifact synchronization.
//!
//! A second, independent consumer of the same terminal events. The
//! side panel shows at most one open document at a time, so its
//! matching rule is deliberately looser than the transcript's tiers:
//! project or request equality is a refinement, not a requirement --
//! a document that is still pending or streaming matches too. Unlike
//! the transcript, the panel never synthesizes new entries: an event
//! that matches nothing is a no-op here.

use serde::{Deserialize, Serialize};

use medley_channel::messages::ChannelEvent;
use medley_core::job::GenerationJob;
use medley_core::types::Timestamp;

use crate::patcher::{apply_outcome, has_outcome, job_from_event};

/// Top-level streaming state of the side-panel document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Created, generation not yet streaming.
    Pending,
    /// Content is still arriving.
    Streaming,
    /// No further streaming expected.
    Idle,
}

impl DocumentStatus {
    pub fn is_open(self) -> bool {
        matches!(self, DocumentStatus::Pending | DocumentStatus::Streaming)
    }
}

/// The side-panel document the synchronizer operates on. Owned and
/// rendered by the host UI; only the descriptor and the top-level
/// status are touched here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDocument {
    pub id: String,
    pub title: String,
    pub status: DocumentStatus,
    /// Serialized [`GenerationJob`] blob, as in transcript messages.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub descriptor: Option<String>,
    pub updated_at: Timestamp,
}

impl ArtifactDocument {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: DocumentStatus::Pending,
            descriptor: None,
            updated_at: chrono::Utc::now(),
        }
    }

    pub fn with_job(mut self, job: &GenerationJob) -> Self {
        self.descriptor = serde_json::to_string(job).ok();
        self
    }

    pub fn job(&self) -> Option<GenerationJob> {
        let blob = self.descriptor.as_deref()?;
        serde_json::from_str(blob).ok()
    }
}

/// Whether the event applies to this document.
fn matches(doc: &ArtifactDocument, event: &ChannelEvent) -> bool {
    if doc.status.is_open() {
        return true;
    }
    if let Some(job) = doc.job() {
        if event.project_id.as_deref() == Some(job.project_id.as_str()) {
            return true;
        }
        if job.request_id.is_some() && job.request_id.as_deref() == event.request_id.as_deref() {
            return true;
        }
    }
    false
}

/// Apply a terminal event to the document.
///
/// Pure and idempotent: on match the descriptor is rewritten exactly
/// like a transcript patch and the document flips to `Idle` (no
/// further streaming expected); applying the same event again changes
/// nothing. Non-terminal and non-matching events return the document
/// untouched.
pub fn patch_document(mut doc: ArtifactDocument, event: &ChannelEvent) -> ArtifactDocument {
    if !has_outcome(event) || !matches(&doc, event) {
        return doc;
    }

    let mut job = match doc.job() {
        Some(job) => job,
        None => job_from_event(event),
    };
    let job_changed = apply_outcome(&mut job, event);
    let status_changed = doc.status != DocumentStatus::Idle;

    if !job_changed && !status_changed {
        return doc;
    }

    tracing::debug!(
        document_id = %doc.id,
        project_id = %job.project_id,
        "Synchronized artifact document",
    );
    doc.descriptor = serde_json::to_string(&job).ok();
    doc.status = DocumentStatus::Idle;
    doc.updated_at = chrono::Utc::now();
    doc
}
