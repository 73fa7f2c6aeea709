//! PuzzleCatalog / SnapshotSink trait 定義
//!
//! パズル定義の取得とスナップショットの永続化は外部の協調者の責務です。
//! ライブな同期の正しさはどちらにも依存しません。

use async_trait::async_trait;
use thiserror::Error;

use super::{entity::SessionSnapshot, puzzle::PuzzleLayout, value_object::PuzzleId};

/// パズル定義のカタログ
#[async_trait]
pub trait PuzzleCatalog: Send + Sync {
    async fn layout(&self, puzzle_id: &PuzzleId) -> Option<PuzzleLayout>;
}

#[derive(Debug, Error)]
#[error("failed to write snapshot: {0}")]
pub struct SnapshotSinkError(pub String);

/// セッションスナップショットの書き出し先
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn write(&self, snapshot: &SessionSnapshot) -> Result<(), SnapshotSinkError>;
}
