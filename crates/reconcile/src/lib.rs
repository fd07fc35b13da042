//! Reconciliation of terminal channel events into external UI state.
//!
//! Two independent consumers of the same event stream live here:
//!
//! - the transcript [`Reconciler`](patcher::Reconciler), which patches
//!   the best-matching in-flight placeholder message (or appends a new
//!   terminal message) using tiered priority matching;
//! - the [`artifact`] synchronizer, which applies the same events to
//!   the side-panel document with a deliberately looser matching rule.
//!
//! Both are idempotent and commutative under re-delivery, so arbitrary
//! interleaving of the two is safe.

pub mod artifact;
pub mod grace;
pub mod patcher;
pub mod transcript;
