//! Job tracking for the medley engine.
//!
//! Ties the pieces together: the start-API client arms a
//! [`JobTracker`](job_tracker::JobTracker) with its correlation scope,
//! the [`MultiScopeRouter`](router::MultiScopeRouter) keeps channel
//! subscriptions in sync with the scopes a conversation references,
//! and the [`polling`] fallback covers jobs whose channel never
//! delivers a result.

pub mod config;
pub mod job_tracker;
pub mod polling;
pub mod router;
pub mod start;
