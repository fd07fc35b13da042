//! `medley-monitor` -- operational tap on a project's event stream.
//!
//! Connects to the streaming endpoint for one project scope and logs
//! every event it carries, with connection transitions. Useful for
//! eyeballing a live pipeline without a chat client attached.
//!
//! # Environment variables
//!
//! | Variable            | Required | Default | Description                        |
//! |---------------------|----------|---------|------------------------------------|
//! | `MEDLEY_PROJECT_ID` | yes*     | --      | Project scope to watch (*or pass as first CLI argument) |
//! | `MEDLEY_WS_URL`     | no       | `ws://localhost:3000` | Streaming endpoint base URL |
//!
//! Reconnect and timeout tuning follows the `MEDLEY_*` variables
//! documented on [`EngineConfig::from_env`].

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medley_channel::messages::{ChannelEvent, EventKind};
use medley_channel::multiplexer::ChannelMultiplexer;
use medley_tracker::config::EngineConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medley_monitor=debug,medley_channel=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let project_id = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MEDLEY_PROJECT_ID").ok())
        .unwrap_or_else(|| {
            tracing::error!("Project id required: pass as argument or set MEDLEY_PROJECT_ID");
            std::process::exit(1);
        });

    let config = EngineConfig::from_env();

    tracing::info!(
        project_id = %project_id,
        ws_base_url = %config.ws_base_url,
        "Starting medley-monitor",
    );

    let mux = ChannelMultiplexer::new(config.channel_config());

    let handler: Arc<dyn Fn(&ChannelEvent) + Send + Sync> = Arc::new(log_event);
    mux.open(&project_id, vec![handler]).await;
    mux.observe(&project_id, Arc::new(|connected| {
        if connected {
            tracing::info!("Stream connected");
        } else {
            tracing::warn!("Stream disconnected");
        }
    }))
    .await;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutting down");
    mux.close_all().await;
}

fn log_event(event: &ChannelEvent) {
    match event.classify() {
        EventKind::Progress => tracing::info!(
            project_id = event.project_id.as_deref().unwrap_or("-"),
            request_id = event.request_id.as_deref().unwrap_or("-"),
            progress = event.progress_percent().unwrap_or(0),
            "Progress",
        ),
        EventKind::File => tracing::info!(
            project_id = event.project_id.as_deref().unwrap_or("-"),
            url = event.result_url().unwrap_or("-"),
            "Result ready",
        ),
        EventKind::Error => tracing::warn!(
            project_id = event.project_id.as_deref().unwrap_or("-"),
            error = event.error.as_deref().unwrap_or("generation failed"),
            "Generation failed",
        ),
        EventKind::SubscribeAck => tracing::debug!("Subscription acknowledged"),
        EventKind::Other => tracing::debug!(kind = %event.kind, "Unsolicited event"),
    }
}
