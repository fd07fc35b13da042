//! Transcript reconciliation: match a terminal channel event to the
//! correct in-flight placeholder and apply an idempotent patch.
//!
//! Matching is tiered, highest first:
//!
//! 3. candidate request id equals the event's request id;
//! 2. candidate project id equals the event's project id;
//! 1. candidate is still open (`Pending`/`Processing`) -- last resort;
//! 0. no match, candidate ignored.
//!
//! The scan runs newest-to-oldest, so ties within a tier resolve to
//! the most recent message. A terminal candidate only matches when
//! re-applying the event would change nothing (duplicate delivery);
//! otherwise the terminal guard excludes it. When no candidate exists
//! at all, a new terminal message is appended -- completion events are
//! never silently dropped.

use std::time::Instant;

use medley_channel::messages::{ChannelEvent, EventKind};
use medley_core::job::{GenerationJob, JobStatus};

use crate::grace::{GraceBuffer, DEFAULT_GRACE_WINDOW};
use crate::transcript::TranscriptMessage;

/// Terminal outcome carried by a `file` or `error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Completed(String),
    Failed(String),
}

/// Extract the terminal outcome of an event, if it has one.
///
/// A `file` event whose result object is not a recognized media type
/// still terminates the job, as a failure -- the provider produced
/// something we cannot attach.
fn outcome(event: &ChannelEvent) -> Option<Outcome> {
    match event.classify() {
        EventKind::File => Some(match event.result_url() {
            Some(url) => Outcome::Completed(url.to_string()),
            None => Outcome::Failed("unrecognized result type".to_string()),
        }),
        EventKind::Error => Some(Outcome::Failed(
            event
                .error
                .clone()
                .unwrap_or_else(|| "generation failed".to_string()),
        )),
        _ => None,
    }
}

/// Whether applying `event` to an already-terminal `job` would change
/// nothing (re-delivery of the event that terminated it).
fn is_duplicate(job: &GenerationJob, event: &ChannelEvent) -> bool {
    match outcome(event) {
        Some(Outcome::Completed(url)) => {
            job.status == JobStatus::Completed && job.result_url.as_deref() == Some(url.as_str())
        }
        Some(Outcome::Failed(message)) => {
            job.status == JobStatus::Failed && job.error.as_deref() == Some(message.as_str())
        }
        None => false,
    }
}

/// Priority of a candidate relative to an incoming event (0 = ignore).
pub fn candidate_priority(job: &GenerationJob, event: &ChannelEvent) -> u8 {
    let tier = match (&job.request_id, &event.request_id) {
        (Some(ours), Some(theirs)) if ours == theirs => 3,
        _ if event.project_id.as_deref() == Some(job.project_id.as_str()) => 2,
        _ if !job.is_terminal() => 1,
        _ => 0,
    };
    if tier == 0 {
        return 0;
    }
    // Terminal guard: a finished candidate only matches duplicates.
    if job.is_terminal() && !is_duplicate(job, event) {
        return 0;
    }
    tier
}

/// Index of the best-matching candidate, scanning newest-to-oldest.
pub fn find_candidate(messages: &[TranscriptMessage], event: &ChannelEvent) -> Option<usize> {
    find_best(messages, event, 1)
}

/// Like [`find_candidate`], but only accepts candidates whose
/// correlation ids actually match the event (request or project tier).
/// The still-open fallback tier is excluded, so an event for one
/// project never claims another project's placeholder.
pub fn find_scoped_candidate(
    messages: &[TranscriptMessage],
    event: &ChannelEvent,
) -> Option<usize> {
    find_best(messages, event, 2)
}

fn find_best(
    messages: &[TranscriptMessage],
    event: &ChannelEvent,
    min_tier: u8,
) -> Option<usize> {
    let mut best: Option<(u8, usize)> = None;
    for (idx, message) in messages.iter().enumerate().rev() {
        let Some(job) = message.job() else { continue };
        let priority = candidate_priority(&job, event);
        if priority < min_tier {
            continue;
        }
        // Strict comparison keeps the most recent message per tier.
        if best.map_or(true, |(current, _)| priority > current) {
            best = Some((priority, idx));
        }
        if priority == 3 {
            break;
        }
    }
    best.map(|(_, idx)| idx)
}

/// Apply a terminal event to one transcript snapshot.
///
/// Pure: consumes and returns the message list. When a candidate is
/// found its descriptor is rewritten in place (ids preserved, all
/// other message fields untouched); when none is found a new terminal
/// message is appended. Applying the same event twice yields a
/// byte-identical descriptor.
pub fn patch_transcript(
    mut messages: Vec<TranscriptMessage>,
    event: &ChannelEvent,
) -> Vec<TranscriptMessage> {
    if outcome(event).is_none() {
        return messages;
    }

    match find_candidate(&messages, event) {
        Some(idx) => {
            // find_candidate only returns messages with a parseable job.
            if let Some(job) = messages[idx].job() {
                if let Some(next) = patched_job(&job, event) {
                    if next != job {
                        tracing::debug!(
                            message_id = %messages[idx].id,
                            project_id = %next.project_id,
                            "Patched transcript placeholder",
                        );
                        messages[idx].set_job(&next);
                    }
                }
            }
        }
        None => {
            tracing::debug!(
                project_id = event.project_id.as_deref().unwrap_or(""),
                "No placeholder found, appending terminal message",
            );
            messages.push(terminal_message(event));
        }
    }
    messages
}

/// Whether the event carries a terminal outcome at all. Shared with
/// the artifact synchronizer.
pub(crate) fn has_outcome(event: &ChannelEvent) -> bool {
    outcome(event).is_some()
}

/// Apply the event's terminal outcome to a job, respecting the
/// terminal guard. Returns whether the job changed.
pub(crate) fn apply_outcome(job: &mut GenerationJob, event: &ChannelEvent) -> bool {
    match outcome(event) {
        Some(Outcome::Completed(url)) => job.complete(url),
        Some(Outcome::Failed(message)) => job.fail(message),
        None => false,
    }
}

/// A fresh job carrying only the event's correlation ids, used when no
/// descriptor exists to patch.
pub(crate) fn job_from_event(event: &ChannelEvent) -> GenerationJob {
    let mut job = GenerationJob::new(event.project_id.clone().unwrap_or_default());
    job.request_id = event.request_id.clone();
    job
}

/// The candidate's job after applying the event. `None` when the event
/// carries no terminal outcome.
fn patched_job(job: &GenerationJob, event: &ChannelEvent) -> Option<GenerationJob> {
    if !has_outcome(event) {
        return None;
    }
    let mut next = job.clone();
    apply_outcome(&mut next, event);
    Some(next)
}

/// Synthesize a standalone terminal message for an event that matched
/// no placeholder.
fn terminal_message(event: &ChannelEvent) -> TranscriptMessage {
    let mut job = job_from_event(event);
    apply_outcome(&mut job, event);
    TranscriptMessage::new(uuid::Uuid::new_v4().to_string(), String::new()).with_job(&job)
}

/// Stateful reconciler: [`patch_transcript`] plus the grace window for
/// the placeholder-creation race.
///
/// Job creation (the placeholder message) and job completion (the
/// event) can race: the placeholder may not yet be in the transcript
/// when its completion arrives. Instead of appending immediately, an
/// unmatched terminal event is parked for a bounded window and applied
/// as soon as a matching placeholder shows up; only on expiry does it
/// fall into the append branch.
pub struct Reconciler {
    buffer: GraceBuffer,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::with_grace_window(DEFAULT_GRACE_WINDOW)
    }

    pub fn with_grace_window(window: std::time::Duration) -> Self {
        Self {
            buffer: GraceBuffer::new(window),
        }
    }

    /// Consume one inbound event against the current transcript
    /// snapshot. Non-terminal events pass through untouched.
    pub fn apply(
        &mut self,
        messages: Vec<TranscriptMessage>,
        event: &ChannelEvent,
        now: Instant,
    ) -> Vec<TranscriptMessage> {
        if outcome(event).is_none() {
            return messages;
        }
        if find_candidate(&messages, event).is_some() {
            return patch_transcript(messages, event);
        }
        self.buffer.park(event.clone(), now);
        messages
    }

    /// Re-check parked events after the transcript changed (e.g. the
    /// racing placeholder was just created).
    pub fn on_transcript_changed(
        &mut self,
        mut messages: Vec<TranscriptMessage>,
    ) -> Vec<TranscriptMessage> {
        for event in self.buffer.claim(&messages) {
            messages = patch_transcript(messages, &event);
        }
        messages
    }

    /// Flush parked events whose grace window has expired into the
    /// append branch.
    pub fn flush_expired(
        &mut self,
        mut messages: Vec<TranscriptMessage>,
        now: Instant,
    ) -> Vec<TranscriptMessage> {
        for event in self.buffer.expired(now) {
            messages = patch_transcript(messages, &event);
        }
        messages
    }

    /// Earliest deadline among parked events, for driving a timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.buffer.next_deadline()
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}
