//! SnapshotSink の実装
//!
//! - `file`: セッションごとに JSON ファイルへ書き出す
//! - `noop`: 何もしない（書き出し先が設定されていない場合）

pub mod file;
pub mod noop;

pub use file::FileSnapshotSink;
pub use noop::NoopSnapshotSink;
