//! Shared types for the medley job-tracking engine.
//!
//! Defines the [`GenerationJob`](job::GenerationJob) state machine, the
//! [`Scope`](scope::Scope) event filter, and the type aliases used by
//! every other crate in the workspace.

pub mod job;
pub mod scope;
pub mod types;
