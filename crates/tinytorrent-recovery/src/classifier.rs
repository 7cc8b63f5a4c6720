//! Fault classification and non-mutating path probes.
//!
//! # Design
//! - `classify` is a pure function of the descriptor, the probe result, and the host mode.
//! - Probing never mutates engine or filesystem state; it only reads free space, path
//!   existence, volume presence, and writability.

use tinytorrent_recovery_core::{
    Confidence, ErrorClass, FaultClassification, FaultDescriptor, FaultKind, FsErrorKind,
    HostMode, HostProbe, PathProbe, PathReason, RecoveryEngine, VolumeProbe,
};
use tracing::debug;

/// Classify a fault from its descriptor and a fresh probe.
#[must_use]
pub fn classify(
    descriptor: &FaultDescriptor,
    probe: &PathProbe,
    mode: HostMode,
) -> FaultClassification {
    let affected_path = descriptor.path.clone();
    let direct = mode.has_filesystem_access();
    let certain = if direct {
        Confidence::Certain
    } else {
        Confidence::Heuristic
    };

    match descriptor.error_class {
        ErrorClass::PermissionDenied => FaultClassification {
            kind: FaultKind::AccessDenied,
            affected_path,
            volume_root: None,
            reason: Some(PathReason::Unwritable),
            confidence: certain,
        },
        ErrorClass::DiskFull => FaultClassification {
            kind: FaultKind::PathLoss,
            affected_path,
            volume_root: None,
            reason: Some(PathReason::DiskFull),
            confidence: certain,
        },
        ErrorClass::MissingFiles => {
            let mount_unknown = probe
                .volume
                .as_ref()
                .is_some_and(|volume| volume.mounted.is_none());
            let confidence = if direct && !mount_unknown {
                Confidence::Certain
            } else {
                Confidence::Heuristic
            };
            let unmounted_root = probe
                .volume
                .as_ref()
                .filter(|volume| direct && !probe.path_exists && volume.mounted == Some(false))
                .map(|volume| volume.root.clone());
            match unmounted_root {
                Some(root) => FaultClassification {
                    kind: FaultKind::VolumeLoss,
                    affected_path,
                    volume_root: Some(root),
                    reason: Some(PathReason::Missing),
                    confidence,
                },
                None => FaultClassification {
                    kind: FaultKind::PathLoss,
                    affected_path,
                    volume_root: None,
                    reason: Some(PathReason::Missing),
                    confidence,
                },
            }
        }
        ErrorClass::HashMismatch | ErrorClass::Unknown => FaultClassification {
            kind: FaultKind::DataGap,
            affected_path,
            volume_root: None,
            reason: None,
            confidence: certain,
        },
    }
}

/// Why the fault still prevents progress, or `None` when the location looks usable.
///
/// Data-level faults never block. An existing path proves its volume is present.
#[must_use]
pub fn blocking_reason(
    classification: &FaultClassification,
    probe: &PathProbe,
    min_free_bytes: u64,
) -> Option<PathReason> {
    if !classification.kind.is_storage_fault() {
        return None;
    }
    if !probe.path_exists {
        return Some(PathReason::Missing);
    }
    if probe.writable == Some(false) {
        return Some(PathReason::Unwritable);
    }
    if probe
        .free_bytes
        .is_some_and(|free| free <= min_free_bytes)
    {
        return Some(PathReason::DiskFull);
    }
    None
}

/// Whether the fault still prevents progress given the latest probe.
#[must_use]
pub fn is_blocking(
    classification: &FaultClassification,
    probe: &PathProbe,
    min_free_bytes: u64,
) -> bool {
    blocking_reason(classification, probe, min_free_bytes).is_some()
}

/// Lexically derive the volume root hosting `path`.
///
/// Recognises drive letters (`E:`), UNC shares (`\\server\share`), and removable-media
/// mount points (`/Volumes/<name>`, `/media/<user>/<name>`, `/run/media/<user>/<name>`,
/// `/mnt/<name>`).
#[must_use]
pub fn volume_root_of(path: &str) -> Option<String> {
    let path = path.trim();
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Some(format!("{}:", char::from(bytes[0]).to_ascii_uppercase()));
    }
    if let Some(rest) = path
        .strip_prefix(r"\\")
        .or_else(|| path.strip_prefix("//"))
    {
        let mut parts = rest.split(['\\', '/']).filter(|part| !part.is_empty());
        let server = parts.next()?;
        let share = parts.next()?;
        return Some(format!(r"\\{server}\{share}"));
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let depth = match segments.as_slice() {
        ["Volumes" | "mnt", _, ..] => 2,
        ["media", _, _, ..] => 3,
        ["run", "media", _, _, ..] => 4,
        _ => return None,
    };
    Some(format!("/{}", segments[..depth].join("/")))
}

/// Run one round of non-mutating probes for `path`.
///
/// Free space always comes from the engine. Existence comes from the host when it can
/// answer, otherwise from whether the engine could query free space at all.
pub async fn probe_path(engine: &dyn RecoveryEngine, host: &dyn HostProbe, path: &str) -> PathProbe {
    let free_space = engine.check_free_space(path).await;
    let free_bytes = match &free_space {
        Ok(space) => Some(space.size_bytes),
        Err(err) => {
            debug!(path, error = %err.describe(), "free-space probe failed");
            None
        }
    };
    let path_exists = host.path_exists(path).unwrap_or_else(|| match &free_space {
        Ok(_) => true,
        Err(err) => matches!(
            err.fs_kind(),
            Some(FsErrorKind::AccessDenied | FsErrorKind::DiskFull)
        ),
    });
    let volume = volume_root_of(path).map(|root| VolumeProbe {
        mounted: if path_exists {
            Some(true)
        } else {
            host.volume_mounted(&root)
        },
        root,
    });
    let writable = if path_exists {
        host.is_writable(path)
    } else {
        None
    };

    PathProbe {
        path_exists,
        volume,
        writable,
        free_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinytorrent_test_support::{
        FakeEngine, FakeHost, disk_full, hash_mismatch, missing_files, permission_denied,
    };

    fn probe(path_exists: bool, volume: Option<(&str, Option<bool>)>) -> PathProbe {
        PathProbe {
            path_exists,
            volume: volume.map(|(root, mounted)| VolumeProbe {
                root: root.to_string(),
                mounted,
            }),
            writable: path_exists.then_some(true),
            free_bytes: Some(1 << 30),
        }
    }

    #[test]
    fn volume_roots_are_derived_lexically() {
        assert_eq!(volume_root_of(r"E:\Media").as_deref(), Some("E:"));
        assert_eq!(volume_root_of("e:/media").as_deref(), Some("E:"));
        assert_eq!(
            volume_root_of(r"\\nas\share\movies").as_deref(),
            Some(r"\\nas\share")
        );
        assert_eq!(
            volume_root_of("/Volumes/Backup/torrents").as_deref(),
            Some("/Volumes/Backup")
        );
        assert_eq!(
            volume_root_of("/media/alex/usb/dl").as_deref(),
            Some("/media/alex/usb")
        );
        assert_eq!(
            volume_root_of("/run/media/alex/usb").as_deref(),
            Some("/run/media/alex/usb")
        );
        assert_eq!(volume_root_of("/mnt/data/x").as_deref(), Some("/mnt/data"));
        assert_eq!(volume_root_of("/home/alex/Downloads"), None);
        assert_eq!(volume_root_of("/media/alex"), None);
    }

    #[test]
    fn missing_files_on_unmounted_volume_is_volume_loss() {
        let descriptor = missing_files(r"E:\Media", "fp");
        let classification = classify(
            &descriptor,
            &probe(false, Some(("E:", Some(false)))),
            HostMode::Local,
        );
        assert_eq!(classification.kind, FaultKind::VolumeLoss);
        assert_eq!(classification.volume_root.as_deref(), Some("E:"));
        assert_eq!(classification.reason, Some(PathReason::Missing));
        assert_eq!(classification.confidence, Confidence::Certain);
    }

    #[test]
    fn missing_files_without_mount_state_is_heuristic_path_loss() {
        let descriptor = missing_files("/mnt/usb/dl", "fp");
        let classification = classify(
            &descriptor,
            &probe(false, Some(("/mnt/usb", None))),
            HostMode::Local,
        );
        assert_eq!(classification.kind, FaultKind::PathLoss);
        assert_eq!(classification.confidence, Confidence::Heuristic);

        let remote = classify(&descriptor, &probe(false, None), HostMode::Remote);
        assert_eq!(remote.kind, FaultKind::PathLoss);
        assert_eq!(remote.confidence, Confidence::Heuristic);
    }

    #[test]
    fn remaining_classes_map_to_their_kinds() {
        let any_probe = probe(true, None);
        let denied = classify(&permission_denied("/data", "a"), &any_probe, HostMode::Local);
        assert_eq!(denied.kind, FaultKind::AccessDenied);
        assert_eq!(denied.reason, Some(PathReason::Unwritable));

        let full = classify(&disk_full("/data", "b"), &any_probe, HostMode::Local);
        assert_eq!(full.kind, FaultKind::PathLoss);
        assert_eq!(full.reason, Some(PathReason::DiskFull));

        let gap = classify(&hash_mismatch("/data", "c"), &any_probe, HostMode::Local);
        assert_eq!(gap.kind, FaultKind::DataGap);
        assert!(gap.reason.is_none());
        assert!(!is_blocking(&gap, &probe(false, None), 0));
    }

    #[test]
    fn classification_is_referentially_stable() {
        let descriptor = missing_files(r"E:\Media", "fp");
        let observed = probe(false, Some(("E:", Some(false))));
        let first = classify(&descriptor, &observed, HostMode::Local);
        for _ in 0..16 {
            assert_eq!(classify(&descriptor, &observed, HostMode::Local), first);
        }
    }

    #[test]
    fn blocking_reason_tracks_probe_state() {
        let descriptor = disk_full("/data", "fp");
        let mut observed = probe(true, None);
        observed.free_bytes = Some(0);
        let classification = classify(&descriptor, &observed, HostMode::Local);
        assert_eq!(
            blocking_reason(&classification, &observed, 0),
            Some(PathReason::DiskFull)
        );
        observed.free_bytes = Some(10 << 30);
        assert!(!is_blocking(&classification, &observed, 0));
        assert!(is_blocking(&classification, &observed, 20 << 30));

        observed.writable = Some(false);
        assert_eq!(
            blocking_reason(&classification, &observed, 0),
            Some(PathReason::Unwritable)
        );
        observed.path_exists = false;
        assert_eq!(
            blocking_reason(&classification, &observed, 0),
            Some(PathReason::Missing)
        );
    }

    #[test]
    fn existing_path_outranks_an_unmounted_volume_answer() {
        let observed = probe(true, Some(("/mnt/data", Some(false))));
        for descriptor in [missing_files("/mnt/data/dl", "a"), disk_full("/mnt/data/dl", "b")] {
            let classification = classify(&descriptor, &observed, HostMode::Local);
            assert_eq!(classification.kind, FaultKind::PathLoss);
            assert!(classification.volume_root.is_none());
            assert!(!is_blocking(&classification, &observed, 0));
        }
    }

    /// Host whose mount check cannot tell a plain directory from a mount point.
    struct SameDeviceHost;

    impl HostProbe for SameDeviceHost {
        fn mode(&self) -> HostMode {
            HostMode::Local
        }

        fn path_exists(&self, _path: &str) -> Option<bool> {
            Some(true)
        }

        fn volume_mounted(&self, _root: &str) -> Option<bool> {
            Some(false)
        }

        fn is_writable(&self, _path: &str) -> Option<bool> {
            Some(true)
        }

        fn create_directory(&self, _path: &str) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn existing_directory_under_mnt_is_not_volume_loss() {
        let engine = FakeEngine::new();
        engine.set_free_space("/mnt/data/dl", 1 << 30);
        let observed = probe_path(&engine, &SameDeviceHost, "/mnt/data/dl").await;
        assert!(observed.path_exists);
        assert!(!observed.volume_unmounted());

        let classification = classify(
            &missing_files("/mnt/data/dl", "fp"),
            &observed,
            HostMode::Local,
        );
        assert_eq!(classification.kind, FaultKind::PathLoss);
        assert_eq!(classification.confidence, Confidence::Certain);
        assert_eq!(blocking_reason(&classification, &observed, 0), None);
    }

    #[tokio::test]
    async fn probe_uses_host_answers_when_local() {
        let engine = FakeEngine::new();
        let host = FakeHost::local();
        host.set_volume("E:", false);
        let observed = probe_path(&engine, &host, r"E:\Media").await;
        assert!(!observed.path_exists);
        assert!(observed.volume_unmounted());
        assert!(observed.writable.is_none());
        assert_eq!(engine.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn remote_probe_falls_back_to_engine_free_space() {
        let engine = FakeEngine::new();
        let host = FakeHost::remote();
        engine.set_free_space("/srv/dl", 42);
        let present = probe_path(&engine, &host, "/srv/dl").await;
        assert!(present.path_exists);
        assert_eq!(present.free_bytes, Some(42));
        assert!(present.writable.is_none());

        engine.mark_path_missing("/srv/gone");
        let absent = probe_path(&engine, &host, "/srv/gone").await;
        assert!(!absent.path_exists);
        assert!(absent.free_bytes.is_none());
    }
}
