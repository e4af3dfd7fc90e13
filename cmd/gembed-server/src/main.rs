//! gembed-server - HTTP front end for batch text embeddings.

mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use gembed::{EmbeddingService, Engine};
use tracing_subscriber::EnvFilter;

use config::ServerConfig;
use server::AppState;

/// Serves POST /embed backed by the native gembed engine.
#[derive(Parser, Debug)]
#[command(name = "gembed-server")]
#[command(about = "HTTP front end for batch text embeddings")]
#[command(version)]
struct Args {
    /// Config file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file (e.g. :8080)
    #[arg(short, long)]
    listen: Option<String>,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    gembed::install(native_engine()?)?;
    let service = EmbeddingService::from_global()?;
    server::serve(AppState::new(service, config)).await
}

#[cfg(feature = "native")]
fn native_engine() -> Result<Arc<dyn Engine>> {
    Ok(gembed::NativeEngine::shared())
}

#[cfg(not(feature = "native"))]
fn native_engine() -> Result<Arc<dyn Engine>> {
    anyhow::bail!("gembed-server was built without the `native` feature; rebuild with --features native")
}
