mod analyze;
mod annotate;
mod config;
mod detections;
mod detector;
mod error;
mod frame;
mod server;
mod stream;
mod yolo;

use clap::Parser;
use tracing::{info, warn};

use crate::config::Config;
use crate::detector::DetectorHandle;
use crate::server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::parse();
    info!("starting MicroV detection backend");

    // A missing or broken model degrades the service instead of aborting it:
    // the page still renders and the analysis endpoints report unavailability.
    let detector = DetectorHandle::load(&config);
    if !detector.is_ready() {
        warn!("running without a usable detector; analysis requests will be rejected");
    }

    let state = AppState::new(detector, &config);
    let app = server::router(state, &config.static_dir);

    info!(addr = %config.listen, "listening");
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
