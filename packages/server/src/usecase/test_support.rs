//! Fixtures for usecase tests: several nodes sharing one in-memory store and backplane.

use std::{
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use kumitate_shared::time::ManualClock;
use tokio::sync::{Mutex, mpsc};

use crate::{
    config::SyncConfig,
    domain::{
        CasOutcome, ConnectionId, ConnectionRecord, CoordinationStore, DisplayName, Guard,
        Keyspace, MoveRequest, NodeId, PieceId, PuzzleCatalog, PuzzleId, SessionId, StoreError,
        UserId,
    },
    infrastructure::{
        backplane::InMemoryBackplane, catalog::InMemoryPuzzleCatalog,
        snapshot::NoopSnapshotSink, store::InMemoryCoordinationStore,
    },
    node::{NodeParts, SyncNode},
};

use super::session_manager::JoinRequest;

pub(crate) const PUZZLE: &str = "demo-2x2";

pub(crate) struct TestCluster {
    pub store: Arc<InMemoryCoordinationStore>,
    pub backplane: Arc<InMemoryBackplane>,
    pub clock: Arc<ManualClock>,
    pub catalog: Arc<InMemoryPuzzleCatalog>,
    pub config: SyncConfig,
}

pub(crate) struct TestNode {
    node: SyncNode,
}

impl Deref for TestNode {
    type Target = SyncNode;

    fn deref(&self) -> &SyncNode {
        &self.node
    }
}

impl TestNode {
    /// Join the shared test session as `c-{user}`.
    pub async fn join(&self, user: &str) -> (ConnectionRecord, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outcome = self
            .sessions
            .join(TestCluster::join_request(&format!("c-{user}"), user), tx)
            .await
            .expect("join failed");
        (outcome.record, rx)
    }
}

impl TestCluster {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(1_000_000));
        Self {
            store: Arc::new(InMemoryCoordinationStore::with_clock(clock.clone())),
            backplane: Arc::new(InMemoryBackplane::new()),
            clock,
            catalog: Arc::new(InMemoryPuzzleCatalog::builtin()),
            config: SyncConfig {
                namespace: "test".to_string(),
                ..SyncConfig::default()
            },
        }
    }

    pub fn node(&self, node_id: &str) -> TestNode {
        self.node_with_store(node_id, self.store.clone())
    }

    /// A node that reaches the shared store through `store` (for example a [`ScriptedStore`]).
    pub fn node_with_store(&self, node_id: &str, store: Arc<dyn CoordinationStore>) -> TestNode {
        let parts = NodeParts {
            store,
            backplane: self.backplane.clone(),
            catalog: self.catalog.clone(),
            sink: Arc::new(NoopSnapshotSink),
            clock: self.clock.clone(),
        };
        TestNode {
            node: SyncNode::new(
                NodeId::new(node_id.to_string()).unwrap(),
                self.config.clone(),
                parts,
            ),
        }
    }

    pub fn keys(&self) -> Keyspace {
        Keyspace::new(self.config.namespace.clone())
    }

    pub fn session_id() -> SessionId {
        SessionId::new("s1".to_string()).unwrap()
    }

    pub fn join_request(connection: &str, user: &str) -> JoinRequest {
        JoinRequest {
            connection_id: ConnectionId::new(connection.to_string()).unwrap(),
            session_id: Self::session_id(),
            puzzle_id: PuzzleId::new(PUZZLE.to_string()).unwrap(),
            user_id: UserId::new(user.to_string()).unwrap(),
            display_name: DisplayName::new(user.to_string()).unwrap(),
        }
    }

    pub fn request(piece: u32, x: f64, y: f64, base_version: u64) -> MoveRequest {
        MoveRequest {
            piece_id: PieceId::new(piece),
            x,
            y,
            rotation: 0.0,
            base_version,
        }
    }

    /// Target position of a piece of the test puzzle.
    pub fn target(&self, piece: u32) -> (f64, f64) {
        let layout = futures_util::FutureExt::now_or_never(
            self.catalog
                .layout(&PuzzleId::new(PUZZLE.to_string()).unwrap()),
        )
        .flatten()
        .expect("test puzzle missing");
        let slot = layout.slot(PieceId::new(piece)).expect("piece missing");
        (slot.target_x, slot.target_y)
    }

    /// Everything already queued on a connection.
    pub fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Wait for a frame containing `needle`, skipping others.
    pub async fn recv_matching(rx: &mut mpsc::UnboundedReceiver<String>, needle: &str) -> String {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match rx.recv().await {
                    Some(frame) if frame.contains(needle) => return frame,
                    Some(_) => continue,
                    None => panic!("channel closed while waiting for {needle}"),
                }
            }
        })
        .await
        .expect("timed out waiting for frame")
    }
}

/// Store wrapper that can inject work or faults into specific operations.
pub(crate) struct ScriptedStore {
    inner: Arc<InMemoryCoordinationStore>,
    after_members_read: Mutex<Option<BoxFuture<'static, ()>>>,
    fail_scans: AtomicBool,
}

impl ScriptedStore {
    pub fn new(inner: Arc<InMemoryCoordinationStore>) -> Self {
        Self {
            inner,
            after_members_read: Mutex::new(None),
            fail_scans: AtomicBool::new(false),
        }
    }

    /// Run `work` once, right after the next `set_members` read and before it returns.
    pub async fn after_next_members_read<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        *self.after_members_read.lock().await = Some(Box::pin(work));
    }

    pub fn fail_scans(&self, fail: bool) {
        self.fail_scans.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CoordinationStore for ScriptedStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.inner.compare_and_expire(key, expected, ttl).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        guard: Option<Guard>,
    ) -> Result<CasOutcome, StoreError> {
        self.inner
            .compare_and_swap(key, expected, new_value, guard)
            .await
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("scan refused".to_string()));
        }
        self.inner.scan(prefix).await
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.inner.set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.inner.set_remove(key, member).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let members = self.inner.set_members(key).await?;
        let work = self.after_members_read.lock().await.take();
        if let Some(work) = work {
            work.await;
        }
        Ok(members)
    }
}
