//! Fault descriptor fixtures.

use chrono::{TimeZone, Utc};
use tinytorrent_recovery_core::{ErrorClass, FaultDescriptor, Fingerprint, RecoveryActionKind};

/// Builder for fault descriptors with stable timestamps.
#[derive(Debug, Clone)]
pub struct FaultFixture {
    descriptor: FaultDescriptor,
}

impl FaultFixture {
    /// Start a descriptor for the given class and download location.
    #[must_use]
    pub fn new(class: ErrorClass, path: &str) -> Self {
        let last_fault_at = Utc
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            descriptor: FaultDescriptor {
                error_class: class,
                error_message: format!("{} at {path}", class.as_str()),
                last_fault_at,
                retry_count: 0,
                fingerprint: Fingerprint::default(),
                primary_action: None,
                path: path.to_string(),
            },
        }
    }

    /// Set an explicit fingerprint.
    #[must_use]
    pub fn fingerprint(mut self, fingerprint: &str) -> Self {
        self.descriptor.fingerprint = Fingerprint::new(fingerprint);
        self
    }

    /// Set the engine's suggested action.
    #[must_use]
    pub fn primary_action(mut self, action: RecoveryActionKind) -> Self {
        self.descriptor.primary_action = Some(action);
        self
    }

    /// Set the retry count.
    #[must_use]
    pub fn retries(mut self, count: u32) -> Self {
        self.descriptor.retry_count = count;
        self
    }

    /// Finish the descriptor.
    #[must_use]
    pub fn build(self) -> FaultDescriptor {
        self.descriptor
    }
}

/// `missingFiles` descriptor.
#[must_use]
pub fn missing_files(path: &str, fingerprint: &str) -> FaultDescriptor {
    FaultFixture::new(ErrorClass::MissingFiles, path)
        .fingerprint(fingerprint)
        .build()
}

/// `diskFull` descriptor.
#[must_use]
pub fn disk_full(path: &str, fingerprint: &str) -> FaultDescriptor {
    FaultFixture::new(ErrorClass::DiskFull, path)
        .fingerprint(fingerprint)
        .build()
}

/// `permissionDenied` descriptor.
#[must_use]
pub fn permission_denied(path: &str, fingerprint: &str) -> FaultDescriptor {
    FaultFixture::new(ErrorClass::PermissionDenied, path)
        .fingerprint(fingerprint)
        .build()
}

/// `hashMismatch` descriptor.
#[must_use]
pub fn hash_mismatch(path: &str, fingerprint: &str) -> FaultDescriptor {
    FaultFixture::new(ErrorClass::HashMismatch, path)
        .fingerprint(fingerprint)
        .build()
}
