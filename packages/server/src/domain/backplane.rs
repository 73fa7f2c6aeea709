//! Backplane trait 定義
//!
//! ノード間でセッション単位のイベントを配るための Pub/Sub インターフェースです。
//! 配送は at-least-once、チャネル間の順序保証はありません。

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::BackplaneError;

/// 購読チャネルから受け取ったメッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackplaneMessage {
    pub channel: String,
    pub payload: String,
}

/// 購読を表す受信側
///
/// drop すると購読は解除される（実装はバックグラウンドの転送を止める）。
pub type Subscription = mpsc::UnboundedReceiver<BackplaneMessage>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backplane: Send + Sync {
    /// チャネルに 1 回だけ発行する（購読しているすべてのノードに届く）
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BackplaneError>;

    /// チャネルを購読する
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BackplaneError>;
}
