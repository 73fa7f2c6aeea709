//! インメモリの Backplane 実装
//!
//! チャネルごとに `tokio::sync::broadcast` を持ちます。
//! 同じインスタンスを複数のノードに渡すと、1 プロセス内でノード間配信を再現できます。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast, mpsc};

use crate::domain::{Backplane, BackplaneError, BackplaneMessage, Subscription};

const DEFAULT_CAPACITY: usize = 1024;

pub struct InMemoryBackplane {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl InMemoryBackplane {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// チャネルごとのバッファ長を指定して作成
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InMemoryBackplane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backplane for InMemoryBackplane {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BackplaneError> {
        let sender = self.sender(channel).await;
        // 購読者がいない場合は誰にも届かないだけで、エラーではない
        let receivers = sender.send(payload.to_string()).unwrap_or(0);
        tracing::trace!(channel, receivers, "published to in-memory backplane");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BackplaneError> {
        let mut source = self.sender(channel).await.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = channel.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = source.recv() => match received {
                        Ok(payload) => {
                            let message = BackplaneMessage {
                                channel: channel.clone(),
                                payload,
                            };
                            if tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(channel = %channel, skipped, "backplane subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = tx.closed() => break,
                }
            }
            tracing::debug!(channel = %channel, "in-memory subscription closed");
        });

        Ok(rx)
    }
}
