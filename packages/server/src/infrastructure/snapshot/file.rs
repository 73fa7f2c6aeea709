//! ファイルへの SnapshotSink 実装
//!
//! `{dir}/{session_id}.json` に最新のスナップショットを上書きします。
//! 書き込み途中のファイルが読まれないよう、一時ファイルに書いてから rename します。

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::{SessionSnapshot, SnapshotSink, SnapshotSinkError};

pub struct FileSnapshotSink {
    dir: PathBuf,
}

impl FileSnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, snapshot: &SessionSnapshot) -> PathBuf {
        self.dir.join(format!("{}.json", snapshot.session_id))
    }
}

#[async_trait]
impl SnapshotSink for FileSnapshotSink {
    async fn write(&self, snapshot: &SessionSnapshot) -> Result<(), SnapshotSinkError> {
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| SnapshotSinkError(e.to_string()))?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SnapshotSinkError(e.to_string()))?;

        let path = self.path_for(snapshot);
        let temp = path.with_extension("json.tmp");
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| SnapshotSinkError(e.to_string()))?;
        tokio::fs::rename(&temp, &path)
            .await
            .map_err(|e| SnapshotSinkError(e.to_string()))?;

        tracing::debug!(
            session_id = %snapshot.session_id,
            path = %path.display(),
            "snapshot written"
        );
        Ok(())
    }
}
