//! Redis Pub/Sub を使った Backplane 実装
//!
//! 発行は `ConnectionManager` 経由の `PUBLISH`、購読はチャネルごとに専用の
//! Pub/Sub 接続を張ります。接続が切れると購読の受信側が閉じるため、
//! 呼び出し側は再購読してください。

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{Client, aio::ConnectionManager};
use tokio::sync::mpsc;

use crate::domain::{Backplane, BackplaneError, BackplaneMessage, Subscription};

#[derive(Clone)]
pub struct RedisBackplane {
    client: Client,
    publisher: ConnectionManager,
}

impl RedisBackplane {
    pub async fn connect(client: Client) -> Result<Self, BackplaneError> {
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BackplaneError::Unavailable(e.to_string()))?;
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl Backplane for RedisBackplane {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BackplaneError> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| BackplaneError::Unavailable(e.to_string()))?;
        tracing::trace!(channel, receivers, "published to redis");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BackplaneError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BackplaneError::Unavailable(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BackplaneError::Unavailable(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            loop {
                tokio::select! {
                    message = messages.next() => {
                        let Some(message) = message else {
                            tracing::warn!(channel = %channel, "redis subscription stream ended");
                            break;
                        };
                        let payload: String = match message.get_payload() {
                            Ok(payload) => payload,
                            Err(e) => {
                                tracing::warn!(channel = %channel, "undecodable pub/sub payload: {}", e);
                                continue;
                            }
                        };
                        let message = BackplaneMessage {
                            channel: message.get_channel_name().to_string(),
                            payload,
                        };
                        if tx.send(message).is_err() {
                            break;
                        }
                    }
                    _ = tx.closed() => break,
                }
            }
            tracing::debug!(channel = %channel, "redis subscription closed");
        });

        Ok(rx)
    }
}
