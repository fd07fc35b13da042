//! Multi-scope channel multiplexer.
//!
//! [`ChannelMultiplexer`] owns one WebSocket connection per correlation
//! scope, keyed by project id. Each scope gets its own handler set,
//! connection task (connect -> process -> reconnect loop) and
//! cancellation token, so several conversations' jobs can stream
//! concurrently without stepping on each other.
//!
//! Connection lifecycle rules:
//! - `open` is idempotent while a scope's task is live, and respawns
//!   the task after the retry ceiling was exhausted;
//! - removing the last handler of a scope closes its connection -- no
//!   orphaned sockets;
//! - once the bounded reconnect policy gives up, the scope stays
//!   closed until `open` is called again.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use medley_core::types::ProjectId;

use crate::client::ChannelClient;
use crate::dispatch::{ConnectionObserver, EventHandler, HandlerId, ScopeHandlers};
use crate::processor::process_frames;
use crate::reconnect::{connect_with_retry, ReconnectConfig};

/// How long `close` waits for a connection task to wind down.
const TASK_SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Connection settings shared by every scope the multiplexer opens.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket base URL, e.g. `ws://host:3000`.
    pub ws_base_url: String,
    /// Ceiling on a single connect attempt.
    pub connect_timeout: std::time::Duration,
    pub reconnect: ReconnectConfig,
}

impl ChannelConfig {
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
            connect_timeout: crate::client::DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Per-scope connection manager.
///
/// Created once and shared via `Arc` with the router and any other
/// component that opens subscriptions (explicit dependency injection,
/// no ambient globals).
pub struct ChannelMultiplexer {
    /// Active scopes indexed by project id.
    scopes: RwLock<HashMap<ProjectId, ManagedScope>>,
    config: ChannelConfig,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

/// Internal bookkeeping for a single scope.
struct ManagedScope {
    handlers: Arc<ScopeHandlers>,
    task_handle: tokio::task::JoinHandle<()>,
    /// Per-scope cancellation token (child of the master token).
    cancel: CancellationToken,
}

impl ChannelMultiplexer {
    pub fn new(config: ChannelConfig) -> Arc<Self> {
        Arc::new(Self {
            scopes: RwLock::new(HashMap::new()),
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Open a subscription for `project_id` and register `handlers`.
    ///
    /// Idempotent while the scope's connection task is live: a second
    /// `open` for the same scope only adds handlers. If the previous
    /// task exhausted its retry ceiling, the task is respawned with
    /// the surviving handler set.
    pub async fn open(&self, project_id: &str, handlers: Vec<EventHandler>) -> Vec<HandlerId> {
        let mut scopes = self.scopes.write().await;

        if let Some(managed) = scopes.get(project_id) {
            let ids = register_all(&managed.handlers, handlers);
            if managed.task_handle.is_finished() {
                tracing::info!(project_id, "Reopening scope after retry ceiling");
                let shared = Arc::clone(&managed.handlers);
                let respawned = self.spawn_scope(project_id, shared);
                scopes.insert(project_id.to_string(), respawned);
            }
            return ids;
        }

        let shared = Arc::new(ScopeHandlers::new());
        let ids = register_all(&shared, handlers);
        let managed = self.spawn_scope(project_id, shared);
        scopes.insert(project_id.to_string(), managed);
        ids
    }

    /// Register a connection-state observer on an open scope.
    ///
    /// Returns `false` when the scope is not open.
    pub async fn observe(&self, project_id: &str, observer: ConnectionObserver) -> bool {
        let scopes = self.scopes.read().await;
        match scopes.get(project_id) {
            Some(managed) => {
                managed.handlers.observe(observer);
                true
            }
            None => false,
        }
    }

    /// Unregister handlers from a scope. When the handler set becomes
    /// empty the scope's connection is closed.
    pub async fn remove_handlers(&self, project_id: &str, ids: &[HandlerId]) {
        let mut scopes = self.scopes.write().await;
        let Some(managed) = scopes.get(project_id) else {
            return;
        };

        if managed.handlers.remove(ids) == 0 {
            tracing::info!(project_id, "Last handler removed, closing scope");
            if let Some(managed) = scopes.remove(project_id) {
                shutdown_scope(project_id, managed).await;
            }
        }
    }

    /// Close one scope's connection and drop its handlers. Safe to
    /// call when already closed.
    pub async fn close(&self, project_id: &str) {
        let managed = self.scopes.write().await.remove(project_id);
        if let Some(managed) = managed {
            shutdown_scope(project_id, managed).await;
        }
    }

    /// Tear down every scope. Cancels the master token, then waits
    /// briefly for each connection task to exit.
    pub async fn close_all(&self) {
        tracing::info!("Shutting down channel multiplexer");
        self.cancel.cancel();

        let mut scopes = self.scopes.write().await;
        for (project_id, managed) in scopes.drain() {
            shutdown_scope(&project_id, managed).await;
        }
    }

    /// Whether the scope currently has a live connection. `false` for
    /// unopened scopes, scopes mid-reconnect, and scopes whose retry
    /// ceiling was exhausted.
    pub async fn is_connected(&self, project_id: &str) -> bool {
        let scopes = self.scopes.read().await;
        scopes
            .get(project_id)
            .map(|managed| managed.handlers.is_connected())
            .unwrap_or(false)
    }

    /// Whether the scope has an active connection task (possibly still
    /// connecting or reconnecting).
    pub async fn is_open(&self, project_id: &str) -> bool {
        let scopes = self.scopes.read().await;
        scopes
            .get(project_id)
            .map(|managed| !managed.task_handle.is_finished())
            .unwrap_or(false)
    }

    /// Project ids of all currently open scopes.
    pub async fn open_scopes(&self) -> Vec<ProjectId> {
        self.scopes.read().await.keys().cloned().collect()
    }

    /// Wait for a scope's connection task to exit. Test and shutdown
    /// aid; resolves immediately for unknown scopes.
    pub async fn wait_closed(&self, project_id: &str) {
        loop {
            {
                let scopes = self.scopes.read().await;
                match scopes.get(project_id) {
                    Some(managed) if !managed.task_handle.is_finished() => {}
                    _ => return,
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    /// Spawn the long-lived connect -> process -> reconnect task for a
    /// scope. Caller holds the scope-map write lock.
    fn spawn_scope(&self, project_id: &str, handlers: Arc<ScopeHandlers>) -> ManagedScope {
        let client = ChannelClient::new(project_id, self.config.ws_base_url.clone())
            .with_connect_timeout(self.config.connect_timeout);
        let reconnect = self.config.reconnect.clone();
        let scope_cancel = self.cancel.child_token();

        let task_cancel = scope_cancel.clone();
        let task_handlers = Arc::clone(&handlers);
        let task_handle = tokio::spawn(async move {
            tracing::info!(project_id = %client.project_id(), "Starting scope connection task");
            run_scope_loop(&client, &reconnect, &task_handlers, &task_cancel).await;
            tracing::info!(project_id = %client.project_id(), "Scope connection task exited");
        });

        ManagedScope {
            handlers,
            task_handle,
            cancel: scope_cancel,
        }
    }
}

fn register_all(handlers: &ScopeHandlers, new: Vec<EventHandler>) -> Vec<HandlerId> {
    new.into_iter().map(|h| handlers.register(h)).collect()
}

async fn shutdown_scope(project_id: &str, managed: ManagedScope) {
    tracing::info!(project_id, "Stopping scope connection task");
    managed.cancel.cancel();
    let _ = tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, managed.task_handle).await;
}

/// Core scope loop: connect (bounded attempts) -> process frames ->
/// reconnect. Exits when the retry ceiling is exhausted or the token
/// is cancelled.
async fn run_scope_loop(
    client: &ChannelClient,
    reconnect: &ReconnectConfig,
    handlers: &ScopeHandlers,
    cancel: &CancellationToken,
) {
    loop {
        let Some(conn) = connect_with_retry(client, reconnect, cancel).await else {
            // Cancelled or retry ceiling reached; the scope stays
            // closed until `open` is called again.
            handlers.set_connected(false);
            return;
        };

        handlers.set_connected(true);

        let mut ws_stream = conn.ws_stream;
        process_frames(&mut ws_stream, client.project_id(), handlers, cancel).await;

        handlers.set_connected(false);

        if cancel.is_cancelled() {
            return;
        }

        tracing::info!(
            project_id = %client.project_id(),
            "Connection lost, attempting to reconnect",
        );
    }
}
