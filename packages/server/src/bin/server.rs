//! Kumitate synchronization node.
//!
//! Serves WebSocket clients and coordinates with the other nodes of the deployment
//! through Redis. Without `--redis-url` the node runs alone with in-memory coordination.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin kumitate-server
//! cargo run --bin kumitate-server -- --port 3000 --redis-url redis://127.0.0.1:6379
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use kumitate_server::{
    config::SyncConfig,
    domain::{NodeId, PuzzleCatalog, SnapshotSink},
    infrastructure::{
        catalog::InMemoryPuzzleCatalog,
        snapshot::{FileSnapshotSink, NoopSnapshotSink},
    },
    node::{NodeParts, SyncNode},
    ui::Server,
};
use kumitate_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "kumitate-server")]
#[command(about = "Real-time synchronization node for collaborative jigsaw puzzles", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, env = "KUMITATE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "KUMITATE_PORT", default_value = "8080")]
    port: u16,

    /// Redis URL of the shared coordination store and backplane
    #[arg(long, env = "KUMITATE_REDIS_URL")]
    redis_url: Option<String>,

    /// Key prefix shared by every node of a deployment
    #[arg(long, env = "KUMITATE_NAMESPACE", default_value = "kumitate")]
    namespace: String,

    /// Node ID (generated when omitted)
    #[arg(long, env = "KUMITATE_NODE_ID")]
    node_id: Option<String>,

    #[arg(long, env = "KUMITATE_LOCK_TTL_MS", default_value_t = 5_000)]
    lock_ttl_ms: u64,

    #[arg(long, env = "KUMITATE_HEARTBEAT_TTL_MS", default_value_t = 15_000)]
    heartbeat_ttl_ms: u64,

    #[arg(long, env = "KUMITATE_HEARTBEAT_INTERVAL_MS", default_value_t = 5_000)]
    heartbeat_interval_ms: u64,

    #[arg(long, env = "KUMITATE_REAPER_INTERVAL_MS", default_value_t = 5_000)]
    reaper_interval_ms: u64,

    /// How long an empty session is kept before it is destroyed
    #[arg(long, env = "KUMITATE_SESSION_GRACE_MS", default_value_t = 60_000)]
    session_grace_ms: u64,

    /// 0 disables periodic resync
    #[arg(long, env = "KUMITATE_RESYNC_INTERVAL_MS", default_value_t = 30_000)]
    resync_interval_ms: u64,

    /// 0 disables the snapshot writer
    #[arg(long, env = "KUMITATE_SNAPSHOT_INTERVAL_MS", default_value_t = 30_000)]
    snapshot_interval_ms: u64,

    #[arg(long, env = "KUMITATE_CLIENT_IDLE_TIMEOUT_MS", default_value_t = 30_000)]
    client_idle_timeout_ms: u64,

    /// Directory for session snapshots (snapshots are discarded when omitted)
    #[arg(long, env = "KUMITATE_SNAPSHOT_DIR")]
    snapshot_dir: Option<PathBuf>,

    /// JSON file of puzzle layouts (built-in puzzles when omitted)
    #[arg(long, env = "KUMITATE_CATALOG")]
    catalog: Option<PathBuf>,
}

impl Args {
    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            namespace: self.namespace.clone(),
            lock_ttl: Duration::from_millis(self.lock_ttl_ms),
            heartbeat_ttl: Duration::from_millis(self.heartbeat_ttl_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            reaper_interval: Duration::from_millis(self.reaper_interval_ms),
            session_grace: Duration::from_millis(self.session_grace_ms),
            resync_interval: Duration::from_millis(self.resync_interval_ms),
            snapshot_interval: Duration::from_millis(self.snapshot_interval_ms),
            client_idle_timeout: Duration::from_millis(self.client_idle_timeout_ms),
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize dependencies in order:
    // 1. Config / NodeId
    // 2. Catalog / SnapshotSink
    // 3. Store / Backplane
    // 4. Node (usecases)
    // 5. Server
    let config = args.sync_config();
    let node_id = match &args.node_id {
        Some(id) => NodeId::new(id.clone())?,
        None => NodeId::generate(),
    };
    if config.heartbeat_interval >= config.heartbeat_ttl {
        tracing::warn!(
            "heartbeat interval {:?} is not shorter than heartbeat ttl {:?}, live connections may be reaped",
            config.heartbeat_interval,
            config.heartbeat_ttl
        );
    }

    let catalog: Arc<dyn PuzzleCatalog> = match &args.catalog {
        Some(path) => Arc::new(InMemoryPuzzleCatalog::from_json_file(path).await?),
        None => Arc::new(InMemoryPuzzleCatalog::builtin()),
    };
    let sink: Arc<dyn SnapshotSink> = match &args.snapshot_dir {
        Some(dir) => Arc::new(FileSnapshotSink::new(dir.clone())),
        None => Arc::new(NoopSnapshotSink),
    };

    let parts = NodeParts::connect(args.redis_url.as_deref(), catalog, sink).await?;
    let node = Arc::new(SyncNode::new(node_id, config, parts));
    tracing::info!(
        node_id = %node.node_id,
        namespace = %node.config.namespace,
        cleanup_bound = ?node.config.cleanup_bound(),
        "node created"
    );

    Server::new(node).run(args.host, args.port).await
}
