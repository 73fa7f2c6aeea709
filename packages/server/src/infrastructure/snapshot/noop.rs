use async_trait::async_trait;

use crate::domain::{SessionSnapshot, SnapshotSink, SnapshotSinkError};

/// Discards every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSnapshotSink;

#[async_trait]
impl SnapshotSink for NoopSnapshotSink {
    async fn write(&self, snapshot: &SessionSnapshot) -> Result<(), SnapshotSinkError> {
        tracing::trace!(session_id = %snapshot.session_id, "snapshot discarded");
        Ok(())
    }
}
