//! Grace buffer for the placeholder-creation race.
//!
//! A terminal event that matches no transcript candidate is parked
//! here, keyed by arrival time, instead of immediately falling into
//! the append-new-message branch. The [`Reconciler`](crate::patcher::Reconciler)
//! claims parked events as soon as a matching placeholder is created,
//! and flushes the rest once their window expires.

use std::time::{Duration, Instant};

use medley_channel::messages::ChannelEvent;

use crate::patcher::find_scoped_candidate;
use crate::transcript::TranscriptMessage;

/// How long an unmatched terminal event waits for its placeholder.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_millis(100);

/// Bounded holding pen for unmatched terminal events.
pub struct GraceBuffer {
    window: Duration,
    parked: Vec<Parked>,
}

struct Parked {
    event: ChannelEvent,
    deadline: Instant,
}

impl GraceBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            parked: Vec::new(),
        }
    }

    /// Park an unmatched terminal event until `now + window`.
    pub fn park(&mut self, event: ChannelEvent, now: Instant) {
        tracing::debug!(
            project_id = event.project_id.as_deref().unwrap_or(""),
            kind = %event.kind,
            window_ms = self.window.as_millis() as u64,
            "Parking unmatched terminal event",
        );
        self.parked.push(Parked {
            event,
            deadline: now + self.window,
        });
    }

    /// Remove and return every parked event that now has a candidate
    /// in `messages` matching its correlation ids. The still-open
    /// fallback tier does not claim: an unrelated placeholder must not
    /// absorb a parked event; those wait for expiry instead.
    pub fn claim(&mut self, messages: &[TranscriptMessage]) -> Vec<ChannelEvent> {
        let mut claimed = Vec::new();
        self.parked.retain(|parked| {
            if find_scoped_candidate(messages, &parked.event).is_some() {
                claimed.push(parked.event.clone());
                false
            } else {
                true
            }
        });
        claimed
    }

    /// Remove and return every parked event whose window has expired.
    pub fn expired(&mut self, now: Instant) -> Vec<ChannelEvent> {
        let mut expired = Vec::new();
        self.parked.retain(|parked| {
            if parked.deadline <= now {
                expired.push(parked.event.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    /// Earliest pending deadline, for driving an expiry timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.parked.iter().map(|parked| parked.deadline).min()
    }

    pub fn len(&self) -> usize {
        self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }
}
