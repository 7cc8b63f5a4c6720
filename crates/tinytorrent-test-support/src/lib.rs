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

//! Shared test helpers used across recovery suites.
//! Layout: fixtures.rs (fault descriptor builders), mocks.rs (fake engine and host).

pub mod fixtures;
pub mod mocks;

pub use fixtures::{FaultFixture, disk_full, hash_mismatch, missing_files, permission_denied};
pub use mocks::{EngineCall, FakeEngine, FakeHost};
