//! Error types reported by engine adapters.

use std::error::Error;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Filesystem-style failure classes an engine call may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FsErrorKind {
    /// Path does not exist.
    Missing,
    /// Path exists but cannot be accessed.
    AccessDenied,
    /// Target volume has no space left.
    DiskFull,
    /// Any other filesystem failure.
    Unknown,
}

impl FsErrorKind {
    /// Stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::AccessDenied => "access-denied",
            Self::DiskFull => "disk-full",
            Self::Unknown => "unknown",
        }
    }
}

/// Primary error type for engine adapter calls.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation is not supported by the engine adapter.
    #[error("engine operation not supported")]
    Unsupported {
        /// Operation identifier.
        operation: &'static str,
    },
    /// The engine reported a filesystem failure.
    #[error("engine filesystem failure")]
    Filesystem {
        /// Operation identifier.
        operation: &'static str,
        /// Failure class.
        kind: FsErrorKind,
        /// Path involved, when known.
        path: Option<String>,
    },
    /// The engine could not be reached or answered unexpectedly.
    #[error("engine transport failure")]
    Transport {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Torrent was not found.
    #[error("torrent not found")]
    NotFound {
        /// Missing torrent identifier.
        torrent_id: Uuid,
    },
}

impl EngineError {
    /// Construct an unsupported-operation error.
    #[must_use]
    pub const fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }

    /// Construct a filesystem failure.
    #[must_use]
    pub fn filesystem(operation: &'static str, kind: FsErrorKind, path: Option<&str>) -> Self {
        Self::Filesystem {
            operation,
            kind,
            path: path.map(str::to_owned),
        }
    }

    /// Wrap a transport-level failure.
    pub fn transport(
        operation: &'static str,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            operation,
            source: source.into(),
        }
    }

    /// Filesystem failure class, when the error carries one.
    #[must_use]
    pub const fn fs_kind(&self) -> Option<FsErrorKind> {
        match self {
            Self::Filesystem { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Operation that failed, when known.
    #[must_use]
    pub const fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Unsupported { operation }
            | Self::Filesystem { operation, .. }
            | Self::Transport { operation, .. } => Some(*operation),
            Self::NotFound { .. } => None,
        }
    }

    /// Single-line description including context fields, used for outcome details.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Unsupported { operation } => format!("{operation}: {self}"),
            Self::Filesystem {
                operation,
                kind,
                path,
            } => path.as_deref().map_or_else(
                || format!("{operation}: {self} ({})", kind.as_str()),
                |path| format!("{operation}: {self} ({}) at {path}", kind.as_str()),
            ),
            Self::Transport { operation, source } => format!("{operation}: {self}: {source}"),
            Self::NotFound { torrent_id } => format!("{self}: {torrent_id}"),
        }
    }
}

/// Convenience alias for engine call results.
pub type EngineResult<T> = Result<T, EngineError>;
