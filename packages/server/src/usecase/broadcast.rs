//! UseCase: イベントのブロードキャスト
//!
//! セッションイベントを、このノードのローカル接続へ直接届けたうえで、
//! バックプレーンに 1 回だけ発行します。他ノードは購読しているセッションのチャネルから
//! イベントを受け取り、自分のローカル接続へ中継します。
//!
//! - 発行元ノードは自分のエコーを無視する（ローカル配信は発行時に済んでいる）
//! - 発行に失敗してもローカルの状態と呼び出し元の結果には影響しない。
//!   バックグラウンドでジッター付き指数バックオフで再送し、上限に達したら破棄する
//! - ノードはローカル接続があるセッションのチャネルだけを購読し、
//!   最後のローカル接続が抜けたら購読をやめる

use std::{collections::HashMap, sync::Arc};

use kumitate_shared::backoff::{Backoff, BackoffConfig};
use tokio::{sync::Mutex, task::JoinHandle};

use crate::domain::{
    Backplane, BackplaneError, ConnectionId, EventEnvelope, Keyspace, MessagePusher, NodeId,
    PusherChannel, SessionEvent, SessionId,
};

/// イベントブロードキャスター
pub struct EventBroadcaster {
    node_id: NodeId,
    keys: Keyspace,
    backplane: Arc<dyn Backplane>,
    pusher: Arc<dyn MessagePusher>,
    /// セッションごとの中継タスク
    relays: Mutex<HashMap<SessionId, JoinHandle<()>>>,
    retry: BackoffConfig,
}

impl EventBroadcaster {
    pub fn new(
        node_id: NodeId,
        keys: Keyspace,
        backplane: Arc<dyn Backplane>,
        pusher: Arc<dyn MessagePusher>,
    ) -> Self {
        Self {
            node_id,
            keys,
            backplane,
            pusher,
            relays: Mutex::new(HashMap::new()),
            retry: BackoffConfig::default(),
        }
    }

    /// 発行失敗時の再送設定を差し替える
    pub fn with_retry(mut self, retry: BackoffConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn pusher(&self) -> &Arc<dyn MessagePusher> {
        &self.pusher
    }

    /// イベントをローカル接続に届け、バックプレーンに発行する
    pub async fn publish(&self, session_id: &SessionId, events: &[SessionEvent]) {
        let channel = self.keys.channel(session_id);
        for event in events {
            let delivered = self.pusher.push_event(session_id, event).await;
            tracing::debug!(
                session_id = %session_id,
                kind = event.kind(),
                delivered,
                "delivered event locally"
            );

            let envelope = EventEnvelope {
                origin: self.node_id.clone(),
                session_id: session_id.clone(),
                event: event.clone(),
            };
            let payload = match serde_json::to_string(&envelope) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(kind = event.kind(), "failed to encode event envelope: {}", e);
                    continue;
                }
            };
            if let Err(e) = self.backplane.publish(&channel, &payload).await {
                tracing::warn!(
                    session_id = %session_id,
                    kind = event.kind(),
                    "backplane publish failed, retrying in background: {}",
                    e
                );
                self.spawn_retry(channel.clone(), payload);
            }
        }
    }

    fn spawn_retry(&self, channel: String, payload: String) {
        let backplane = self.backplane.clone();
        let mut backoff = Backoff::new(self.retry.clone());
        tokio::spawn(async move {
            while let Some(delay) = backoff.next_delay() {
                tokio::time::sleep(delay).await;
                match backplane.publish(&channel, &payload).await {
                    Ok(()) => {
                        tracing::info!(
                            channel = %channel,
                            attempt = backoff.retries(),
                            "backplane publish succeeded after retry"
                        );
                        return;
                    }
                    Err(e) => tracing::debug!(
                        channel = %channel,
                        attempt = backoff.retries(),
                        "backplane publish retry failed: {}",
                        e
                    ),
                }
            }
            tracing::warn!(channel = %channel, "dropping event after exhausting publish retries");
        });
    }

    /// ローカル接続を登録し、セッションのチャネルを購読する
    ///
    /// 購読に失敗してもローカル配信は続けられるため、エラーはログに残して返すだけ。
    pub async fn attach_local(
        &self,
        connection_id: ConnectionId,
        session_id: SessionId,
        sender: PusherChannel,
    ) -> Result<(), BackplaneError> {
        let mut relays = self.relays.lock().await;
        self.pusher
            .register(connection_id, session_id.clone(), sender)
            .await;
        self.subscribe_locked(&mut relays, &session_id).await
    }

    /// ローカル接続の登録を解除し、最後の接続であれば購読をやめる
    pub async fn detach_local(&self, connection_id: &ConnectionId, session_id: &SessionId) {
        let mut relays = self.relays.lock().await;
        if self.pusher.unregister(connection_id).await
            && let Some(relay) = relays.remove(session_id)
        {
            relay.abort();
            tracing::info!(session_id = %session_id, "unsubscribed from session channel");
        }
    }

    /// ローカル接続があるのに中継タスクが動いていないセッションを購読し直す
    pub async fn ensure_local_subscriptions(&self) {
        let mut relays = self.relays.lock().await;
        for session_id in self.pusher.local_sessions().await {
            if let Err(e) = self.subscribe_locked(&mut relays, &session_id).await {
                tracing::warn!(session_id = %session_id, "failed to subscribe: {}", e);
            }
        }
    }

    /// 購読中のセッション
    pub async fn subscribed_sessions(&self) -> Vec<SessionId> {
        let relays = self.relays.lock().await;
        let mut sessions: Vec<SessionId> = relays
            .iter()
            .filter(|(_, relay)| !relay.is_finished())
            .map(|(session_id, _)| session_id.clone())
            .collect();
        sessions.sort();
        sessions
    }

    /// すべての購読をやめる（シャットダウン時）
    pub async fn shutdown(&self) {
        let mut relays = self.relays.lock().await;
        for (_, relay) in relays.drain() {
            relay.abort();
        }
    }

    async fn subscribe_locked(
        &self,
        relays: &mut HashMap<SessionId, JoinHandle<()>>,
        session_id: &SessionId,
    ) -> Result<(), BackplaneError> {
        if relays
            .get(session_id)
            .is_some_and(|relay| !relay.is_finished())
        {
            return Ok(());
        }
        let channel = self.keys.channel(session_id);
        let subscription = self.backplane.subscribe(&channel).await?;
        let relay = Relay {
            node_id: self.node_id.clone(),
            session_id: session_id.clone(),
            channel,
            backplane: self.backplane.clone(),
            pusher: self.pusher.clone(),
            retry: self.retry.clone(),
        };
        relays.insert(session_id.clone(), tokio::spawn(relay.run(subscription)));
        tracing::info!(session_id = %session_id, "subscribed to session channel");
        Ok(())
    }
}

/// 1 セッション分の中継タスク
struct Relay {
    node_id: NodeId,
    session_id: SessionId,
    channel: String,
    backplane: Arc<dyn Backplane>,
    pusher: Arc<dyn MessagePusher>,
    retry: BackoffConfig,
}

impl Relay {
    async fn run(self, mut subscription: crate::domain::Subscription) {
        loop {
            while let Some(message) = subscription.recv().await {
                self.relay(&message.payload).await;
            }

            // 購読が切れた（バックプレーンの切断など）ので購読し直す
            tracing::warn!(session_id = %self.session_id, "session subscription ended, resubscribing");
            let mut backoff = Backoff::new(BackoffConfig {
                max_retries: u32::MAX,
                ..self.retry.clone()
            });
            subscription = loop {
                let Some(delay) = backoff.next_delay() else {
                    return;
                };
                tokio::time::sleep(delay).await;
                match self.backplane.subscribe(&self.channel).await {
                    Ok(subscription) => break subscription,
                    Err(e) => tracing::debug!(
                        session_id = %self.session_id,
                        "resubscribe failed: {}",
                        e
                    ),
                }
            };
            tracing::info!(session_id = %self.session_id, "resubscribed to session channel");
        }
    }

    async fn relay(&self, payload: &str) {
        let envelope: EventEnvelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, "undecodable backplane payload: {}", e);
                return;
            }
        };
        if envelope.origin == self.node_id || envelope.session_id != self.session_id {
            return;
        }
        let delivered = self.pusher.push_event(&self.session_id, &envelope.event).await;
        tracing::debug!(
            session_id = %self.session_id,
            origin = %envelope.origin,
            kind = envelope.event.kind(),
            delivered,
            "relayed event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{MockBackplane, PieceId},
        infrastructure::{backplane::InMemoryBackplane, message_pusher::WebSocketMessagePusher},
    };
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio::sync::mpsc;

    fn session() -> SessionId {
        SessionId::new("s1".to_string()).unwrap()
    }

    fn connection(id: &str) -> ConnectionId {
        ConnectionId::new(id.to_string()).unwrap()
    }

    fn node(id: &str, backplane: Arc<dyn Backplane>) -> EventBroadcaster {
        EventBroadcaster::new(
            NodeId::new(id.to_string()).unwrap(),
            Keyspace::new("test"),
            backplane,
            Arc::new(WebSocketMessagePusher::new()),
        )
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_event_reaches_connections_on_both_nodes_once() {
        // テスト項目: 発行したイベントが両ノードの接続に 1 回ずつ届く（発行元はエコーを無視）
        // given (前提条件):
        let backplane: Arc<dyn Backplane> = Arc::new(InMemoryBackplane::new());
        let node_a = node("node-a", backplane.clone());
        let node_b = node("node-b", backplane.clone());
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        node_a.attach_local(connection("a"), session(), tx_a).await.unwrap();
        node_b.attach_local(connection("b"), session(), tx_b).await.unwrap();

        // when (操作):
        node_a
            .publish(
                &session(),
                &[SessionEvent::PieceReleased {
                    piece_id: PieceId::new(1),
                }],
            )
            .await;

        // then (期待する結果):
        assert!(recv(&mut rx_a).await.contains("piece-released"));
        assert!(recv(&mut rx_b).await.contains("piece-released"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_last_local_connection_unsubscribes() {
        // テスト項目: セッション最後のローカル接続が抜けると購読をやめる
        // given (前提条件):
        let backplane: Arc<dyn Backplane> = Arc::new(InMemoryBackplane::new());
        let node_a = node("node-a", backplane);
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        node_a.attach_local(connection("a1"), session(), tx1).await.unwrap();
        node_a.attach_local(connection("a2"), session(), tx2).await.unwrap();

        // when (操作):
        node_a.detach_local(&connection("a1"), &session()).await;
        let after_first = node_a.subscribed_sessions().await;
        node_a.detach_local(&connection("a2"), &session()).await;
        let after_last = node_a.subscribed_sessions().await;

        // then (期待する結果):
        assert_eq!(after_first, vec![session()]);
        assert!(after_last.is_empty());
    }

    #[tokio::test]
    async fn test_backplane_outage_still_delivers_locally_and_retries() {
        // テスト項目: バックプレーン障害時もローカル配信は行われ、発行はバックグラウンドで再送される
        // given (前提条件):
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut backplane = MockBackplane::new();
        let counter = attempts.clone();
        backplane.expect_publish().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(BackplaneError::Unavailable("down".to_string()))
        });
        backplane
            .expect_subscribe()
            .returning(|_| Err(BackplaneError::Unavailable("down".to_string())));
        let broadcaster = node("node-a", Arc::new(backplane)).with_retry(BackoffConfig {
            initial_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(1),
            max_retries: 2,
            jitter: 0.0,
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let attached = broadcaster.attach_local(connection("a"), session(), tx).await;

        // when (操作):
        broadcaster
            .publish(&session(), &[SessionEvent::PuzzleCompleted])
            .await;

        // then (期待する結果):
        assert!(attached.is_err());
        assert!(recv(&mut rx).await.contains("puzzle-completed"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
