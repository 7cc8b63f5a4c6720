//! Host filesystem probes for local and remote engines.

use std::fs;
use std::io;
use std::path::Path;

use tinytorrent_recovery_core::{HostMode, HostProbe};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

#[cfg(unix)]
use nix::unistd::{AccessFlags, access};

/// Probe for engines sharing this host's filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalHost;

impl HostProbe for LocalHost {
    fn mode(&self) -> HostMode {
        HostMode::Local
    }

    fn path_exists(&self, path: &str) -> Option<bool> {
        Some(Path::new(path).exists())
    }

    /// A missing root is unmounted. An existing root is mounted when it sits on a different
    /// device than its parent; otherwise the answer is unknown (plain directory or bind mount).
    fn volume_mounted(&self, root: &str) -> Option<bool> {
        let root = Path::new(root);
        let Ok(metadata) = fs::metadata(root) else {
            return Some(false);
        };
        mounted_root(root, &metadata)
    }

    fn is_writable(&self, path: &str) -> Option<bool> {
        let path = Path::new(path);
        if !path.exists() {
            return None;
        }
        Some(writable(path))
    }

    fn create_directory(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}

#[cfg(unix)]
fn mounted_root(root: &Path, metadata: &fs::Metadata) -> Option<bool> {
    let parent_metadata = fs::metadata(root.parent()?).ok()?;
    (metadata.dev() != parent_metadata.dev()).then_some(true)
}

#[cfg(not(unix))]
fn mounted_root(_root: &Path, _metadata: &fs::Metadata) -> Option<bool> {
    Some(true)
}

#[cfg(unix)]
fn writable(path: &Path) -> bool {
    access(path, AccessFlags::W_OK).is_ok()
}

#[cfg(not(unix))]
fn writable(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|metadata| !metadata.permissions().readonly())
}

/// Probe for engines on another machine; the filesystem is only visible through the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteHost;

impl HostProbe for RemoteHost {
    fn mode(&self) -> HostMode {
        HostMode::Remote
    }

    fn path_exists(&self, _path: &str) -> Option<bool> {
        None
    }

    fn volume_mounted(&self, _root: &str) -> Option<bool> {
        None
    }

    fn is_writable(&self, _path: &str) -> Option<bool> {
        None
    }

    fn create_directory(&self, _path: &str) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "remote engine host has no local filesystem access",
        ))
    }
}

/// Host probe matching `mode`.
#[must_use]
pub fn host_for(mode: HostMode) -> Box<dyn HostProbe> {
    match mode {
        HostMode::Local => Box::new(LocalHost),
        HostMode::Remote => Box::new(RemoteHost),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_host_probes_real_directories() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("a/b");
        let nested = nested.to_string_lossy().into_owned();
        let host = LocalHost;

        assert_eq!(host.path_exists(&nested), Some(false));
        assert_eq!(host.is_writable(&nested), None);

        host.create_directory(&nested)?;
        assert_eq!(host.path_exists(&nested), Some(true));
        assert_eq!(host.is_writable(&nested), Some(true));
        Ok(())
    }

    #[test]
    fn missing_volume_root_is_unmounted() {
        assert_eq!(
            LocalHost.volume_mounted("/mnt/tinytorrent-definitely-missing"),
            Some(false)
        );
    }

    #[cfg(unix)]
    #[test]
    fn plain_directory_root_has_unknown_mount_state() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let child = dir.path().join("volume");
        fs::create_dir(&child)?;
        assert_eq!(LocalHost.volume_mounted(&child.to_string_lossy()), None);
        Ok(())
    }

    #[test]
    fn remote_host_cannot_answer() {
        let host = host_for(HostMode::Remote);
        assert_eq!(host.mode(), HostMode::Remote);
        assert_eq!(host.path_exists("/"), None);
        let err = host.create_directory("/tmp/x").expect_err("unsupported");
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
