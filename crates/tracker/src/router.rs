//! Multi-scope subscription routing.
//!
//! A conversation can reference several generation jobs at once: its
//! own id is always a scope of interest, and every job descriptor
//! embedded in the transcript adds another. [`MultiScopeRouter`] keeps
//! the channel multiplexer's subscriptions synchronized with that set
//! and forwards terminal events into the injected sink (typically the
//! transcript reconciler plus the artifact synchronizer).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use medley_channel::dispatch::{EventHandler, HandlerId};
use medley_channel::messages::ChannelEvent;
use medley_channel::multiplexer::ChannelMultiplexer;
use medley_core::types::ProjectId;
use medley_reconcile::transcript::{embedded_project_ids, TranscriptMessage};

/// Where terminal (`file`/`error`) events are delivered. The host
/// wires this to its reconciler and artifact state.
pub type TerminalEventSink = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Keeps channel subscriptions in sync with a conversation's scopes.
///
/// Collaborators are injected; the router holds no global state and
/// can be dropped (after [`shutdown`](Self::shutdown)) without
/// affecting other conversations' subscriptions.
pub struct MultiScopeRouter {
    conversation_id: ProjectId,
    mux: Arc<ChannelMultiplexer>,
    sink: TerminalEventSink,
    /// Handler registrations per subscribed scope.
    subscriptions: Mutex<HashMap<ProjectId, Vec<HandlerId>>>,
}

impl MultiScopeRouter {
    pub fn new(
        conversation_id: impl Into<ProjectId>,
        mux: Arc<ChannelMultiplexer>,
        sink: TerminalEventSink,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            mux,
            sink,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Synchronize subscriptions with the scopes the transcript
    /// references: the conversation's own id plus every embedded job
    /// descriptor's project id. Already-subscribed scopes are left
    /// alone.
    pub async fn sync(&self, transcript: &[TranscriptMessage]) {
        let mut scopes = vec![self.conversation_id.clone()];
        for project_id in embedded_project_ids(transcript) {
            if !scopes.contains(&project_id) {
                scopes.push(project_id);
            }
        }
        for project_id in scopes {
            self.connect_scope(&project_id).await;
        }
    }

    /// Subscribe to one scope, or force a reconnect for a scope whose
    /// connection gave up. For callers that learn of a new scope out
    /// of band (e.g. the side panel starting a job before the
    /// transcript reflects it).
    pub async fn connect_scope(&self, project_id: &str) {
        let mut subscriptions = self.subscriptions.lock().await;

        if subscriptions.contains_key(project_id) {
            // Respawns the connection task if its retry ceiling was
            // exhausted; a live scope is untouched.
            self.mux.open(project_id, Vec::new()).await;
            return;
        }

        let ids = self
            .mux
            .open(project_id, vec![forwarding_handler(Arc::clone(&self.sink))])
            .await;
        subscriptions.insert(project_id.to_string(), ids);
        tracing::info!(
            conversation_id = %self.conversation_id,
            project_id,
            "Subscribed to scope",
        );
    }

    /// Scopes this router currently subscribes to.
    pub async fn subscribed_scopes(&self) -> Vec<ProjectId> {
        self.subscriptions.lock().await.keys().cloned().collect()
    }

    /// Retire every subscription this router owns (conversation closed
    /// or changed identity). Scopes whose only handlers were ours get
    /// their connections closed by the multiplexer.
    pub async fn shutdown(&self) {
        let drained: Vec<(ProjectId, Vec<HandlerId>)> =
            self.subscriptions.lock().await.drain().collect();
        for (project_id, ids) in drained {
            self.mux.remove_handlers(&project_id, &ids).await;
        }
        tracing::info!(conversation_id = %self.conversation_id, "Router shut down");
    }
}

/// Forward only terminal events into the sink; everything else on the
/// stream is progress noise to the reconcilers.
fn forwarding_handler(sink: TerminalEventSink) -> EventHandler {
    Arc::new(move |event: &ChannelEvent| {
        if event.is_terminal() {
            sink(event);
        }
    })
}
