use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Runtime configuration for the MicroV backend.
#[derive(Debug, Clone, Parser)]
#[command(name = "microv-backend", about = "MicroV urinary sediment detection backend")]
pub struct Config {
    /// Path to the exported ONNX detection model.
    #[arg(long, default_value = "best.onnx")]
    pub model: PathBuf,

    /// Optional JSON array of class names, overriding the model metadata.
    #[arg(long)]
    pub labels: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Directory served under /static.
    #[arg(long, default_value = "static")]
    pub static_dir: PathBuf,

    /// HTML file served at the root route.
    #[arg(long, default_value = "index.html")]
    pub index: PathBuf,
}
