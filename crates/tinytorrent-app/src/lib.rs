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

//! TinyTorrent recovery runtime bootstrap.
//!
//! Layout: `bootstrap.rs` (component wiring and lifecycle), `error.rs`.

/// Runtime construction and shutdown.
pub mod bootstrap;
pub mod error;

pub use bootstrap::{RecoveryRuntime, RuntimeDependencies};
pub use error::{AppError, AppResult};
