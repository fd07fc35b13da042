//! Event scoping and filtering.
//!
//! A [`Scope`] is the `(project_id, request_id?)` pair that correlates
//! inbound channel events to the job they belong to. Every consumer of
//! the event stream filters through [`Scope::accepts`] before reacting.

use serde::{Deserialize, Serialize};

use crate::types::{ProjectId, RequestId};

/// Correlation scope for a tracked job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub project_id: ProjectId,
    /// When set, events carrying a different request id are rejected.
    pub request_id: Option<RequestId>,
}

impl Scope {
    /// Scope matching every event for a project.
    pub fn project(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            request_id: None,
        }
    }

    /// Scope matching a single request within a project.
    pub fn request(project_id: impl Into<ProjectId>, request_id: impl Into<RequestId>) -> Self {
        Self {
            project_id: project_id.into(),
            request_id: Some(request_id.into()),
        }
    }

    /// Arm exact request matching once the start-API has responded.
    pub fn narrow(&mut self, request_id: impl Into<RequestId>) {
        self.request_id = Some(request_id.into());
    }

    /// Decide whether an event with the given scope fields belongs to
    /// this scope.
    ///
    /// Rules:
    /// - an event with no scope info at all passes through (servers
    ///   are discouraged from sending these, but they are accepted);
    /// - otherwise the project ids must match;
    /// - the request id only has to match when both sides carry one.
    pub fn accepts(&self, project_id: Option<&str>, request_id: Option<&str>) -> bool {
        let Some(event_project) = project_id else {
            tracing::debug!(
                scope_project = %self.project_id,
                "Accepting event with no scope info (pass-through)",
            );
            return true;
        };

        if event_project != self.project_id {
            return false;
        }

        match (&self.request_id, request_id) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => true,
        }
    }
}
