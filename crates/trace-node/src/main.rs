mod api;
mod constants;
mod error;

use anyhow::Context;
use clap::Parser;
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trace_core::{
    chain::Ledger,
    constants::{APPEND_BASE_DELAY_MS, APPEND_MAX_ATTEMPTS},
    entity::Entity,
    EntityStore, RetryPolicy, Sha256Hasher,
};
use trace_storage::SledStore;

use crate::constants::{DEFAULT_DATA_DIR, DEFAULT_LISTEN};

#[derive(Parser, Debug)]
#[command(version, about = "Supply-chain ledger node")]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, env = "TRACE_LISTEN", default_value = DEFAULT_LISTEN)]
    listen: String,

    /// Data directory for sled
    #[arg(long, env = "TRACE_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// JSON array of entities to load before serving
    #[arg(long, env = "TRACE_SEED")]
    seed: Option<PathBuf>,

    /// Attempts per append before giving up on conflicts
    #[arg(long, env = "TRACE_APPEND_ATTEMPTS", default_value_t = APPEND_MAX_ATTEMPTS)]
    append_attempts: u32,

    /// Base backoff between append attempts, in milliseconds
    #[arg(long, env = "TRACE_APPEND_BACKOFF_MS", default_value_t = APPEND_BASE_DELAY_MS)]
    append_backoff_ms: u64,
}

async fn load_seed(store: &SledStore, path: &Path) -> anyhow::Result<usize> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading seed file {}", path.display()))?;
    let entities: Vec<Entity> =
        serde_json::from_slice(&bytes).with_context(|| format!("parsing seed file {}", path.display()))?;
    let count = entities.len();
    for entity in entities {
        let id = entity.id().to_string();
        store
            .put_entity(entity)
            .with_context(|| format!("seeding entity {id}"))?;
    }
    Ok(count)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let store = SledStore::open(&args.data_dir)
        .with_context(|| format!("opening store at {}", args.data_dir.display()))?;
    if let Some(seed) = &args.seed {
        let count = load_seed(&store, seed).await?;
        info!(count, path = %seed.display(), "seed entities loaded");
    }

    let retry = RetryPolicy {
        max_attempts: args.append_attempts.max(1),
        base_delay: Duration::from_millis(args.append_backoff_ms),
        ..RetryPolicy::default()
    };
    let ledger = Ledger::with_hasher(Arc::new(store), Sha256Hasher, retry);

    let startup = ledger.clone();
    let report = tokio::task::spawn_blocking(move || startup.verify()).await??;
    if report.is_valid {
        info!(blocks = report.blocks_checked, "chain intact at startup");
    } else {
        warn!(
            violations = report.violations.len(),
            "chain has violations at startup; serving anyway"
        );
    }

    let app = api::router(ledger);
    let addr: SocketAddr = args.listen.parse()?;
    info!("trace-node listening on http://{addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
