//! # Design
//!
//! - Operation faults are internal to the sequencer and never cross the gate.
//! - Keep error messages constant while carrying context fields for outcome details.

use std::io;

use thiserror::Error;
use tinytorrent_recovery_core::EngineError;

/// Result alias for recovery operations.
pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Failures raised while sequencing a recovery attempt.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// An engine call failed unexpectedly.
    #[error("engine operation failed")]
    Operation {
        /// Operation identifier.
        operation: &'static str,
        /// Source engine error.
        source: EngineError,
    },
    /// A host filesystem mutation failed.
    #[error("host filesystem operation failed")]
    Host {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved.
        path: String,
        /// Source IO error.
        source: io::Error,
    },
}

impl RecoveryError {
    /// Wrap an engine failure for `operation`.
    pub(crate) fn engine(operation: &'static str) -> impl Fn(EngineError) -> Self {
        move |source| Self::Operation { operation, source }
    }

    /// Single-line detail suitable for an `Error` outcome.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Operation { operation, source } => {
                format!("{self} ({operation}): {}", source.describe())
            }
            Self::Host {
                operation,
                path,
                source,
            } => format!("{self} ({operation}) at {path}: {source}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinytorrent_recovery_core::FsErrorKind;

    #[test]
    fn detail_carries_operation_and_source() {
        let err = RecoveryError::engine("resume")(EngineError::filesystem(
            "resume",
            FsErrorKind::AccessDenied,
            Some("/data"),
        ));
        let detail = err.detail();
        assert!(detail.starts_with("engine operation failed (resume)"));
        assert!(detail.contains("access-denied"));

        let err = RecoveryError::Host {
            operation: "create_directory",
            path: "/data/new".into(),
            source: io::Error::other("read-only filesystem"),
        };
        assert!(err.detail().contains("read-only filesystem"));
    }
}
