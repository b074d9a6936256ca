//! DynaStore server binary.
//!
//! Opens (or creates) the database and serves the JSON-over-HTTP dialect
//! on the configured port until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use dynastore_core::DynaStore;
use tracing::info;

/// Local emulator for a DynamoDB-compatible document store.
#[derive(Parser, Debug)]
#[command(name = "dynastore-server")]
struct Args {
    /// Directory holding the ordered KV store.
    #[arg(long, default_value = "dynastore_data")]
    data_dir: PathBuf,

    /// Directory holding named snapshots.
    #[arg(long, default_value = "dynastore_snapshots")]
    snapshot_dir: PathBuf,

    /// Listen port.
    #[arg(long, default_value_t = 8000, env = "PORT")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let db = DynaStore::open(&args.data_dir, &args.snapshot_dir)?;
    let app = dynastore_server::router(db);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, data_dir = %args.data_dir.display(), "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
