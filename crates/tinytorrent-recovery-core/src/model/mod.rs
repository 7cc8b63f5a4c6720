//! Fault, classification, and recovery DTOs shared across the workspace.

use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Fault class reported by the engine for a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorClass {
    /// Payload files are missing from the download location.
    MissingFiles,
    /// The download location cannot be written.
    PermissionDenied,
    /// The download volume is out of space.
    DiskFull,
    /// On-disk data failed verification.
    HashMismatch,
    /// Any class this build does not recognise.
    #[serde(other)]
    Unknown,
}

impl ErrorClass {
    /// Stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingFiles => "missingFiles",
            Self::PermissionDenied => "permissionDenied",
            Self::DiskFull => "diskFull",
            Self::HashMismatch => "hashMismatch",
            Self::Unknown => "unknown",
        }
    }
}

/// Stable identifier for one conceptual fault on one torrent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an engine-supplied fingerprint.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derive a fingerprint from the target and the fault's identifying fields.
    #[must_use]
    pub fn derive(target: Uuid, class: ErrorClass, path: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(target.as_bytes());
        hasher.update([0]);
        hasher.update(class.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(path.as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is blank.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structured record a torrent carries while faulted.
///
/// This is the wire contract with the engine/RPC layer; field names are camelCase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultDescriptor {
    /// Fault class reported by the engine.
    pub error_class: ErrorClass,
    /// Engine-supplied message.
    #[serde(default)]
    pub error_message: String,
    /// When the fault was last raised.
    pub last_fault_at: DateTime<Utc>,
    /// How many times the engine has retried.
    #[serde(default)]
    pub retry_count: u32,
    /// Fingerprint identifying this fault; blank when the engine does not supply one.
    #[serde(default)]
    pub fingerprint: Fingerprint,
    /// Action the engine suggests first.
    #[serde(default)]
    pub primary_action: Option<RecoveryActionKind>,
    /// Download location affected by the fault.
    pub path: String,
}

impl FaultDescriptor {
    /// Fingerprint to key recovery sessions on, deriving one when the engine left it blank.
    #[must_use]
    pub fn fingerprint_for(&self, target: Uuid) -> Fingerprint {
        if self.fingerprint.is_empty() {
            Fingerprint::derive(target, self.error_class, &self.path)
        } else {
            self.fingerprint.clone()
        }
    }
}

/// Typed classification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Data-level problem (verification mismatch, unknown class).
    DataGap,
    /// The download location is unusable.
    PathLoss,
    /// The volume hosting the download location is gone.
    VolumeLoss,
    /// The download location is not writable.
    AccessDenied,
}

impl FaultKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataGap => "data_gap",
            Self::PathLoss => "path_loss",
            Self::VolumeLoss => "volume_loss",
            Self::AccessDenied => "access_denied",
        }
    }

    /// Whether the kind concerns storage availability rather than data integrity.
    #[must_use]
    pub const fn is_storage_fault(self) -> bool {
        !matches!(self, Self::DataGap)
    }
}

/// Why a path needs the operator's attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathReason {
    /// Path or volume is absent.
    Missing,
    /// Path cannot be written.
    Unwritable,
    /// Volume is out of space.
    DiskFull,
}

impl PathReason {
    /// Stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Unwritable => "unwritable",
            Self::DiskFull => "disk-full",
        }
    }
}

/// How directly the classification was verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Derived from direct filesystem observation.
    Certain,
    /// Derived without direct access to the filesystem.
    Heuristic,
}

/// Classification derived from a descriptor and a live probe. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultClassification {
    /// Classification kind.
    pub kind: FaultKind,
    /// Path the fault refers to.
    pub affected_path: String,
    /// Volume root, for volume-level faults.
    pub volume_root: Option<String>,
    /// Reason reported to the operator when a new path is needed.
    pub reason: Option<PathReason>,
    /// How directly the classification was verified.
    pub confidence: Confidence,
}

/// Where the engine runs relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostMode {
    /// Engine shares the local filesystem.
    #[default]
    Local,
    /// Engine is remote; the filesystem is only visible through the engine.
    Remote,
}

impl HostMode {
    /// Whether paths can be probed directly.
    #[must_use]
    pub const fn has_filesystem_access(self) -> bool {
        matches!(self, Self::Local)
    }

    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Mount state of the volume hosting a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeProbe {
    /// Volume root (`E:`, `/Volumes/Media`, ...).
    pub root: String,
    /// Whether the volume is mounted; `None` when it could not be determined.
    pub mounted: Option<bool>,
}

/// Result of one round of non-mutating probes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PathProbe {
    /// Whether the affected path currently exists.
    pub path_exists: bool,
    /// Volume state, when the path sits on a recognisable volume.
    pub volume: Option<VolumeProbe>,
    /// Whether the path is writable; `None` when unknown.
    pub writable: Option<bool>,
    /// Free bytes reported for the path; `None` when the query failed.
    pub free_bytes: Option<u64>,
}

impl PathProbe {
    /// Whether the probe positively observed an unmounted volume.
    #[must_use]
    pub fn volume_unmounted(&self) -> bool {
        self.volume
            .as_ref()
            .is_some_and(|volume| volume.mounted == Some(false))
    }
}

/// Free-space answer from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeSpace {
    /// Free bytes at the queried path.
    pub size_bytes: u64,
}

/// Engine-reported activity used while settling a recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentActivity {
    /// Still in an error state.
    Faulted,
    /// Verifying on-disk data.
    Checking,
    /// Announcing to trackers.
    Announcing,
    /// Downloading or seeding.
    Active,
    /// Stopped by the operator.
    Stopped,
}

/// Action discriminator, as suggested on the wire by `primaryAction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryActionKind {
    /// Resume the torrent.
    Resume,
    /// Re-check the fault.
    Recheck,
    /// Fetch missing data again.
    Redownload,
    /// Point the torrent at a different location.
    SetLocation,
    /// Remove the torrent.
    Remove,
}

impl RecoveryActionKind {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resume => "resume",
            Self::Recheck => "recheck",
            Self::Redownload => "redownload",
            Self::SetLocation => "setLocation",
            Self::Remove => "remove",
        }
    }
}

/// Recovery action requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecoveryAction {
    /// Resume the torrent once its location is usable.
    Resume,
    /// Re-evaluate the fault and resume when it cleared.
    Recheck,
    /// Restart transfer of missing data (guarded against duplicates).
    Redownload,
    /// Relocate the torrent; bypasses the gate.
    SetLocation {
        /// New download location.
        path: String,
        /// Whether existing data should be moved along.
        #[serde(rename = "moveData", default)]
        move_data: bool,
    },
    /// Remove the torrent from the engine.
    Remove {
        /// Whether on-disk data is deleted as well.
        #[serde(rename = "deleteData", default)]
        delete_data: bool,
    },
}

impl RecoveryAction {
    /// Discriminator for the action.
    #[must_use]
    pub const fn kind(&self) -> RecoveryActionKind {
        match self {
            Self::Resume => RecoveryActionKind::Resume,
            Self::Recheck => RecoveryActionKind::Recheck,
            Self::Redownload => RecoveryActionKind::Redownload,
            Self::SetLocation { .. } => RecoveryActionKind::SetLocation,
            Self::Remove { .. } => RecoveryActionKind::Remove,
        }
    }

    /// Stable label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Modifiers for a recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecoveryOptions {
    /// Create the download directory before resuming.
    pub recreate_folder: bool,
    /// Probe only; never mutate engine state.
    pub retry_only: bool,
}

/// Who issued a recovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOrigin {
    /// A person acting through the control surface.
    #[default]
    Interactive,
    /// The background poller.
    Ambient,
}

impl RequestOrigin {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Ambient => "ambient",
        }
    }
}

/// Typed recovery request accepted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    /// Torrent to recover.
    pub target: Uuid,
    /// Requested action.
    pub action: RecoveryAction,
    /// Attempt modifiers.
    #[serde(default)]
    pub options: RecoveryOptions,
    /// Who issued the request.
    #[serde(default)]
    pub origin: RequestOrigin,
}

impl RecoveryRequest {
    /// Interactive request with default options.
    #[must_use]
    pub fn interactive(target: Uuid, action: RecoveryAction) -> Self {
        Self {
            target,
            action,
            options: RecoveryOptions::default(),
            origin: RequestOrigin::Interactive,
        }
    }

    /// Synthetic `recheck` issued by the background poller.
    #[must_use]
    pub fn ambient_recheck(target: Uuid) -> Self {
        Self {
            target,
            action: RecoveryAction::Recheck,
            options: RecoveryOptions::default(),
            origin: RequestOrigin::Ambient,
        }
    }

    /// Replace the attempt modifiers.
    #[must_use]
    pub fn with_options(mut self, options: RecoveryOptions) -> Self {
        self.options = options;
        self
    }
}

/// Result of one recovery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// The engine left the faulted state.
    Resolved,
    /// Nothing needed doing, or a duplicate attempt was suppressed.
    Noop,
    /// The engine started verifying data.
    VerifyStarted,
    /// The engine started announcing to trackers.
    ReannounceStarted,
    /// A new location is required from the operator.
    PathNeeded {
        /// Why the current location is unusable.
        reason: PathReason,
    },
    /// The engine failed unexpectedly.
    Error {
        /// Failure description.
        detail: String,
    },
}

impl RecoveryOutcome {
    /// Stable label for logs, metrics, and events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Noop => "noop",
            Self::VerifyStarted => "verify_started",
            Self::ReannounceStarted => "reannounce_started",
            Self::PathNeeded { .. } => "path_needed",
            Self::Error { .. } => "error",
        }
    }

    /// Whether the engine is now making progress without further input.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::VerifyStarted | Self::ReannounceStarted
        )
    }
}

/// Why a gate request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// A session for a different fingerprint is open.
    Collision,
    /// The session ended without producing an outcome.
    Abandoned,
}

impl CancelReason {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collision => "collision",
            Self::Abandoned => "abandoned",
        }
    }
}

/// What the caller should do after a gated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateOutcome {
    /// The fault was not settled silently; continue the interactive flow.
    Continue {
        /// Attempt outcome (`Noop` when no attempt ran).
        outcome: RecoveryOutcome,
    },
    /// The fault was settled without further input.
    Handled {
        /// Attempt outcome.
        outcome: RecoveryOutcome,
    },
    /// The request was turned away.
    Cancelled {
        /// Why it was turned away.
        reason: CancelReason,
    },
}

impl GateOutcome {
    /// Stable label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Continue { .. } => "continue",
            Self::Handled { .. } => "handled",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Attempt outcome, when an attempt ran or was skipped.
    #[must_use]
    pub const fn outcome(&self) -> Option<&RecoveryOutcome> {
        match self {
            Self::Continue { outcome } | Self::Handled { outcome } => Some(outcome),
            Self::Cancelled { .. } => None,
        }
    }
}

impl From<RecoveryOutcome> for GateOutcome {
    fn from(outcome: RecoveryOutcome) -> Self {
        if outcome.is_settled() {
            Self::Handled { outcome }
        } else {
            Self::Continue { outcome }
        }
    }
}

/// Open recovery negotiation. Owned by the gate while open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySession {
    /// Fingerprint the session is keyed on.
    pub fingerprint: Fingerprint,
    /// Torrent being recovered.
    pub target: Uuid,
    /// Action being executed.
    pub action: RecoveryAction,
    /// Classification at admission time.
    pub classification: FaultClassification,
    /// Who opened the session.
    pub origin: RequestOrigin,
    /// When the session opened.
    pub created_at: DateTime<Utc>,
}
