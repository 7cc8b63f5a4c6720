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

//! Error-recovery orchestration for TinyTorrent.
//!
//! Faults reported by the engine are classified from live probes, admitted through a
//! fingerprint gate that allows one recovery session at a time, and executed by a
//! sequencer that settles against the engine. An ambient poller re-classifies faulted
//! torrents on a cooperative scheduler and requests recovery when a location returns.

/// Fault classification and path probes.
pub mod classifier;
pub mod error;
/// Single-session admission control.
pub mod gate;
pub mod guard;
pub mod host;
pub mod orchestrator;
pub mod poller;
pub mod scheduler;
pub mod sequencer;

pub use classifier::{blocking_reason, classify, is_blocking, probe_path, volume_root_of};
pub use error::{RecoveryError, RecoveryResult};
pub use gate::{FingerprintGate, GateHandle, GateTicket};
pub use guard::IdempotencyGuard;
pub use host::{LocalHost, RemoteHost, host_for};
pub use orchestrator::RecoveryOrchestrator;
pub use poller::{AmbientPoller, PollerCadence};
pub use scheduler::{DEFAULT_STEP, RecurringHandle, Scheduler, TimeoutHandle};
pub use sequencer::{Assessment, RecoverySequencer, SequencerSettings};
