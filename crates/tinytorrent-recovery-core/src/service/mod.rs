//! Engine and host traits implemented by recovery adapters.

use std::io;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::model::{FaultDescriptor, FreeSpace, HostMode, TorrentActivity};

/// Engine operations the recovery core depends on.
///
/// Only `fault_descriptor` is required; the remaining calls default to reporting
/// lack of support so read-only adapters stay small.
#[async_trait]
pub trait RecoveryEngine: Send + Sync {
    /// Current fault descriptor for a torrent, or `None` when it is healthy.
    async fn fault_descriptor(&self, id: Uuid) -> EngineResult<Option<FaultDescriptor>>;

    /// Torrents currently carrying a fault descriptor.
    async fn faulted_targets(&self) -> EngineResult<Vec<Uuid>> {
        Err(EngineError::unsupported("faulted_targets"))
    }

    /// Current activity of a torrent.
    async fn activity(&self, id: Uuid) -> EngineResult<TorrentActivity> {
        let _ = id;
        Err(EngineError::unsupported("activity"))
    }

    /// Resume the given torrents.
    async fn resume(&self, ids: &[Uuid]) -> EngineResult<()> {
        let _ = ids;
        Err(EngineError::unsupported("resume"))
    }

    /// Verify on-disk data for a torrent.
    async fn verify(&self, id: Uuid) -> EngineResult<()> {
        let _ = id;
        Err(EngineError::unsupported("verify"))
    }

    /// Point a torrent at a new download location.
    async fn set_location(&self, id: Uuid, path: &str, move_data: bool) -> EngineResult<()> {
        let _ = (id, path, move_data);
        Err(EngineError::unsupported("set_location"))
    }

    /// Free space reported by the engine for a path.
    ///
    /// Fails with a [`FsErrorKind::Missing`](crate::FsErrorKind::Missing) filesystem
    /// error when the path does not exist on the engine's side.
    async fn check_free_space(&self, path: &str) -> EngineResult<FreeSpace> {
        let _ = path;
        Err(EngineError::unsupported("check_free_space"))
    }

    /// Remove torrents, optionally deleting their data.
    async fn remove(&self, ids: &[Uuid], delete_data: bool) -> EngineResult<()> {
        let _ = (ids, delete_data);
        Err(EngineError::unsupported("remove"))
    }
}

/// Host filesystem access used by the classifier and sequencer.
///
/// Probe methods return `None` when the host cannot answer (remote engines).
pub trait HostProbe: Send + Sync {
    /// Whether the engine shares this host's filesystem.
    fn mode(&self) -> HostMode;

    /// Whether a path exists.
    fn path_exists(&self, path: &str) -> Option<bool>;

    /// Whether the volume rooted at `root` is mounted.
    fn volume_mounted(&self, root: &str) -> Option<bool>;

    /// Whether a path can be written.
    fn is_writable(&self, path: &str) -> Option<bool>;

    /// Create a directory and its parents.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O failure, or [`io::ErrorKind::Unsupported`] when the host
    /// has no filesystem access.
    fn create_directory(&self, path: &str) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FsErrorKind;
    use crate::model::ErrorClass;
    use chrono::Utc;

    struct StubEngine;

    #[async_trait]
    impl RecoveryEngine for StubEngine {
        async fn fault_descriptor(&self, id: Uuid) -> EngineResult<Option<FaultDescriptor>> {
            if id.is_nil() {
                return Ok(None);
            }
            Ok(Some(FaultDescriptor {
                error_class: ErrorClass::DiskFull,
                error_message: "no space left on device".into(),
                last_fault_at: Utc::now(),
                retry_count: 0,
                fingerprint: crate::Fingerprint::new("fp"),
                primary_action: None,
                path: "/data".into(),
            }))
        }
    }

    #[tokio::test]
    async fn default_methods_report_unsupported() -> anyhow::Result<()> {
        let engine = StubEngine;
        let id = Uuid::from_u128(1);

        assert!(engine.fault_descriptor(Uuid::nil()).await?.is_none());
        assert!(engine.fault_descriptor(id).await?.is_some());

        let err = engine.resume(&[id]).await.expect_err("resume unsupported");
        assert_eq!(err.operation(), Some("resume"));
        assert!(matches!(err, EngineError::Unsupported { .. }));

        assert!(engine.verify(id).await.is_err());
        assert!(engine.set_location(id, "/srv", false).await.is_err());
        assert!(engine.remove(&[id], false).await.is_err());
        assert!(engine.faulted_targets().await.is_err());
        assert!(engine.activity(id).await.is_err());

        let err = engine
            .check_free_space("/data")
            .await
            .expect_err("free space unsupported");
        assert_ne!(err.fs_kind(), Some(FsErrorKind::Missing));
        Ok(())
    }
}
