//! Node composition root.
//!
//! A [`SyncNode`] wires every usecase of one server process against the adapters it is
//! given, and runs the node-wide background tasks (heartbeat, reaper, resync, snapshot
//! writer) until the shutdown signal flips.

use std::{sync::Arc, time::Duration};

use kumitate_shared::{
    backoff::{BackoffConfig, retry_with_backoff},
    time::{Clock, SystemClock},
};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    config::SyncConfig,
    domain::{
        Backplane, BackplaneError, CoordinationStore, Keyspace, MessagePusher, NodeId,
        PuzzleCatalog, SnapshotSink, StoreError,
    },
    infrastructure::{
        backplane::{InMemoryBackplane, RedisBackplane},
        message_pusher::WebSocketMessagePusher,
        store::{InMemoryCoordinationStore, RedisCoordinationStore},
    },
    usecase::{
        ConnectionRegistry, EventBroadcaster, GetSessionDetailUseCase, LockManager,
        PieceStateManager, Reaper, ResyncUseCase, SendChatUseCase, SessionManager,
        SnapshotWriter,
    },
};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid redis url: {0}")]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backplane(#[from] BackplaneError),
}

/// External collaborators of a node
#[derive(Clone)]
pub struct NodeParts {
    pub store: Arc<dyn CoordinationStore>,
    pub backplane: Arc<dyn Backplane>,
    pub catalog: Arc<dyn PuzzleCatalog>,
    pub sink: Arc<dyn SnapshotSink>,
    pub clock: Arc<dyn Clock>,
}

impl NodeParts {
    /// Redis-backed store and backplane, or in-memory ones when no url is given.
    ///
    /// In-memory mode only coordinates the nodes of a single process.
    pub async fn connect(
        redis_url: Option<&str>,
        catalog: Arc<dyn PuzzleCatalog>,
        sink: Arc<dyn SnapshotSink>,
    ) -> Result<Self, NodeError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (store, backplane): (Arc<dyn CoordinationStore>, Arc<dyn Backplane>) = match redis_url
        {
            Some(url) => {
                let client = redis::Client::open(url)?;
                tracing::info!("connecting to redis at {}", url);
                (
                    Arc::new(RedisCoordinationStore::connect(client.clone()).await?),
                    Arc::new(RedisBackplane::connect(client).await?),
                )
            }
            None => {
                tracing::warn!("no redis url given, running single-node with in-memory coordination");
                (
                    Arc::new(InMemoryCoordinationStore::with_clock(clock.clone())),
                    Arc::new(InMemoryBackplane::new()),
                )
            }
        };
        Ok(Self {
            store,
            backplane,
            catalog,
            sink,
            clock,
        })
    }
}

/// One server process
pub struct SyncNode {
    pub node_id: NodeId,
    pub config: SyncConfig,
    pub pusher: Arc<dyn MessagePusher>,
    pub registry: Arc<ConnectionRegistry>,
    pub locks: Arc<LockManager>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub pieces: Arc<PieceStateManager>,
    pub sessions: Arc<SessionManager>,
    pub chat: Arc<SendChatUseCase>,
    pub resync: Arc<ResyncUseCase>,
    pub snapshots: Arc<SnapshotWriter>,
    pub reaper: Arc<Reaper>,
    pub session_detail: Arc<GetSessionDetailUseCase>,
}

impl SyncNode {
    pub fn new(node_id: NodeId, config: SyncConfig, parts: NodeParts) -> Self {
        let keys = Keyspace::new(config.namespace.clone());
        let pusher: Arc<dyn MessagePusher> = Arc::new(WebSocketMessagePusher::new());

        let registry = Arc::new(ConnectionRegistry::new(
            parts.store.clone(),
            keys.clone(),
            parts.clock.clone(),
            config.heartbeat_ttl,
        ));
        let locks = Arc::new(LockManager::new(
            parts.store.clone(),
            keys.clone(),
            parts.clock.clone(),
            config.lock_ttl,
        ));
        let broadcaster = Arc::new(EventBroadcaster::new(
            node_id.clone(),
            keys.clone(),
            parts.backplane.clone(),
            pusher.clone(),
        ));
        let pieces = Arc::new(PieceStateManager::new(
            parts.store.clone(),
            keys.clone(),
            parts.clock.clone(),
            parts.catalog.clone(),
            registry.clone(),
            locks.clone(),
            broadcaster.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            parts.store.clone(),
            keys.clone(),
            parts.clock.clone(),
            node_id.clone(),
            parts.catalog.clone(),
            registry.clone(),
            locks.clone(),
            pieces.clone(),
            broadcaster.clone(),
        ));
        let chat = Arc::new(SendChatUseCase::new(
            registry.clone(),
            broadcaster.clone(),
            parts.clock.clone(),
        ));
        let resync = Arc::new(ResyncUseCase::new(sessions.clone(), pusher.clone()));
        let snapshots = Arc::new(SnapshotWriter::new(
            sessions.clone(),
            pusher.clone(),
            parts.sink.clone(),
        ));
        let reaper = Arc::new(Reaper::new(
            parts.store.clone(),
            keys,
            parts.clock.clone(),
            registry.clone(),
            sessions.clone(),
            parts.sink.clone(),
            config.session_grace,
        ));
        let session_detail = Arc::new(GetSessionDetailUseCase::new(sessions.clone()));

        Self {
            node_id,
            config,
            pusher,
            registry,
            locks,
            broadcaster,
            pieces,
            sessions,
            chat,
            resync,
            snapshots,
            reaper,
            session_detail,
        }
    }

    /// Refresh the heartbeat of every local connection and repair lost subscriptions.
    pub async fn heartbeat_local(&self) -> usize {
        let mut refreshed = 0;
        for session_id in self.pusher.local_sessions().await {
            for connection_id in self.pusher.local_connections(&session_id).await {
                match self.registry.heartbeat(&connection_id).await {
                    Ok(()) => refreshed += 1,
                    Err(e) => tracing::warn!(
                        connection_id = %connection_id,
                        "failed to refresh heartbeat: {}",
                        e
                    ),
                }
            }
        }
        self.broadcaster.ensure_local_subscriptions().await;
        refreshed
    }

    /// One reaper pass, retried with backoff while the store is unreachable.
    pub async fn reap(&self) {
        let retry = BackoffConfig {
            max_retries: 2,
            ..BackoffConfig::default()
        };
        let result = retry_with_backoff(
            retry,
            || self.reaper.run_once(),
            |e, attempt, delay| {
                tracing::debug!(attempt, ?delay, "reaper pass failed, retrying: {}", e);
            },
        )
        .await;
        if let Err(e) = result {
            tracing::warn!("reaper pass failed: {}", e);
        }
    }

    /// Spawn the periodic background tasks. They stop when `shutdown` turns `true`.
    pub fn spawn_background_tasks(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let node = self.clone();
        handles.push(spawn_periodic(
            "heartbeat",
            self.config.heartbeat_interval,
            shutdown.clone(),
            move || {
                let node = node.clone();
                async move {
                    node.heartbeat_local().await;
                }
            },
        ));

        let node = self.clone();
        handles.push(spawn_periodic(
            "reaper",
            self.config.reaper_interval,
            shutdown.clone(),
            move || {
                let node = node.clone();
                async move { node.reap().await }
            },
        ));

        if !self.config.resync_interval.is_zero() {
            let node = self.clone();
            handles.push(spawn_periodic(
                "resync",
                self.config.resync_interval,
                shutdown.clone(),
                move || {
                    let node = node.clone();
                    async move {
                        node.resync.resync_local().await;
                    }
                },
            ));
        }

        if !self.config.snapshot_interval.is_zero() {
            let node = self.clone();
            handles.push(spawn_periodic(
                "snapshot",
                self.config.snapshot_interval,
                shutdown,
                move || {
                    let node = node.clone();
                    async move {
                        node.snapshots.write_local().await;
                    }
                },
            ));
        }

        handles
    }

    /// Stop relaying backplane events (the sockets themselves are closed by their handlers).
    pub async fn shutdown(&self) {
        self.broadcaster.shutdown().await;
        tracing::info!(node_id = %self.node_id, "node stopped");
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 初回の即時 tick は飛ばす
        interval.tick().await;
        tracing::debug!(task = name, ?period, "background task started");
        loop {
            tokio::select! {
                _ = interval.tick() => tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(task = name, "background task stopped");
    })
}
