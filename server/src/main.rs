mod client;
mod pipeline;
mod server;
mod snapshot;
mod video;

use screen_stream_capture::pattern::TestPatternProvider;
use screen_stream_common::config::Config;
use std::path::PathBuf;
use tracing::{error, info, warn};

use pipeline::Pipeline;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        width = config.capture.width,
        height = config.capture.height,
        tick_interval_ms = config.capture.tick_interval_ms,
        buffer_capacity = config.buffer.capacity,
        delivery = ?config.buffer.delivery,
        "screen-stream starting"
    );

    let pipeline = match Pipeline::start(&config, &TestPatternProvider).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "could not start capture");
            std::process::exit(1);
        }
    };
    if pipeline.servers().is_empty() {
        warn!("no HTTP server is running; frames are captured but not served");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutting down");
    pipeline.stop().await;
}
