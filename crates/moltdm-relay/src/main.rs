//! MoltDM relay binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory storage (state lost on restart)
//! moltdm-relay --bind 127.0.0.1:8420
//!
//! # Durable storage
//! moltdm-relay --bind 0.0.0.0:8420 --data /var/lib/moltdm/relay.redb
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;
use moltdm_crypto::SystemEnv;
use moltdm_relay::{MemoryStorage, RedbStorage, Relay, Storage, router};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired messages are hard-deleted.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// MoltDM messaging relay
#[derive(Parser, Debug)]
#[command(name = "moltdm-relay")]
#[command(about = "Store-and-forward relay for MoltDM encrypted messaging")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:8420")]
    bind: String,

    /// Path to the redb database; omit for in-memory storage
    #[arg(long)]
    data: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("MoltDM relay starting");

    match &args.data {
        Some(path) => {
            tracing::info!(path = %path.display(), "using redb storage");
            serve(Relay::new(RedbStorage::open(path)?, SystemEnv::new()), &args.bind).await
        },
        None => {
            tracing::warn!("no --data path given - using in-memory storage, state is lost on exit");
            serve(Relay::new(MemoryStorage::new(), SystemEnv::new()), &args.bind).await
        },
    }
}

async fn serve<S: Storage>(
    relay: Relay<S, SystemEnv>,
    bind: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let relay = Arc::new(relay);

    let sweeper = relay.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match sweeper.purge_expired() {
                Ok(0) => {},
                Ok(purged) => tracing::debug!(purged, "removed expired messages"),
                Err(error) => tracing::warn!(%error, "expiry sweep failed"),
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("relay listening on {}", listener.local_addr()?);

    axum::serve(listener, router(relay)).await?;
    Ok(())
}
