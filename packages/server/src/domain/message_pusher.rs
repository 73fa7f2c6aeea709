//! MessagePusher trait 定義
//!
//! このノードに接続しているクライアントへメッセージを届けるためのインターフェースです。
//! ドメイン層はこの抽象にのみ依存し、WebSocket などの具体的な通信手段やワイヤー形式を
//! 知りません（イベントやスナップショットの符号化は実装側の責務）。
//!
//! ## 責務
//!
//! - 接続ごとの送信チャネルを、所属するセッションとともに管理する
//! - 特定の接続、またはセッション単位でのメッセージ送信
//!
//! ノードをまたぐ配信は Backplane の責務であり、ここではローカルの接続のみを扱う。

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    entity::SessionSnapshot,
    error::MessagePushError,
    event::SessionEvent,
    value_object::{ConnectionId, SessionId},
};

/// クライアントへの送信チャネル
pub type PusherChannel = mpsc::UnboundedSender<String>;

#[async_trait]
pub trait MessagePusher: Send + Sync {
    /// 接続を登録する（同じ ID の再登録は上書き）
    async fn register(&self, connection_id: ConnectionId, session_id: SessionId, sender: PusherChannel);

    /// 接続を登録解除する
    ///
    /// その接続が所属セッションで最後のローカル接続だった場合 `true` を返す。
    async fn unregister(&self, connection_id: &ConnectionId) -> bool;

    /// 特定の接続に符号化済みのメッセージを送信
    async fn push_to(
        &self,
        connection_id: &ConnectionId,
        content: &str,
    ) -> Result<(), MessagePushError>;

    /// セッションに所属するこのノードの全接続に符号化済みのメッセージを送信
    ///
    /// 一部の送信失敗は許容し、送信できた接続数を返す。
    async fn broadcast_session(&self, session_id: &SessionId, content: &str) -> usize;

    /// セッションイベントを符号化して、このノードの該当セッションの全接続に送信
    async fn push_event(&self, session_id: &SessionId, event: &SessionEvent) -> usize;

    /// スナップショットを符号化して特定の接続に送信
    async fn push_snapshot(
        &self,
        connection_id: &ConnectionId,
        snapshot: &SessionSnapshot,
    ) -> Result<(), MessagePushError>;

    /// このノードでセッションに所属している接続
    async fn local_connections(&self, session_id: &SessionId) -> Vec<ConnectionId>;

    /// このノードにローカル接続があるセッション
    async fn local_sessions(&self) -> Vec<SessionId>;
}
