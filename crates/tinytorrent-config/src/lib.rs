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

//! File- and environment-backed configuration for the recovery core.
//!
//! Layout: `model.rs` (serialisable `RecoveryProfile`), `loader.rs` (JSON and
//! `TINYTORRENT_*` environment sources), `profile.rs` (guard rails and the
//! effective view), `defaults.rs`, `error.rs`.

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod profile;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_PATH_ENV, ENV_PREFIX};
pub use model::RecoveryProfile;
pub use profile::{LoggingProfile, RecoveryProfileEffective, normalize_recovery_profile};
