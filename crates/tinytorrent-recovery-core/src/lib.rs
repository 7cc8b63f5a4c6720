#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Engine-agnostic recovery interfaces and DTOs.
//!
//! Layout: `model/` (fault descriptors, classifications, outcomes),
//! `service/` (engine and host adapter traits), `error.rs` (engine failures).

pub mod error;
pub mod model;
pub mod service;

pub use error::{EngineError, EngineResult, FsErrorKind};
pub use model::{
    CancelReason, Confidence, ErrorClass, FaultClassification, FaultDescriptor, FaultKind,
    Fingerprint, FreeSpace, GateOutcome, HostMode, PathProbe, PathReason, RecoveryAction,
    RecoveryActionKind, RecoveryOptions, RecoveryOutcome, RecoveryRequest, RecoverySession,
    RequestOrigin, TorrentActivity, VolumeProbe,
};
pub use service::{HostProbe, RecoveryEngine};
