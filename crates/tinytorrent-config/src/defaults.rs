//! Default cadences and guard rails for the recovery profile.
//!
//! # Design
//! - Keep every interval in milliseconds so profiles stay human-editable.
//! - Guard rails bound how aggressive a misconfigured profile can be.

pub(crate) const SCHEDULER_STEP_MS: u64 = 250;
pub(crate) const BASE_INTERVAL_MS: u64 = 500;
pub(crate) const SETTLE_MULTIPLIER: u32 = 20;
pub(crate) const PROBE_INTERVAL_MS: u64 = 5_000;
pub(crate) const VOLUME_INTERVAL_MS: u64 = 2_000;
pub(crate) const PROMPT_RETRY_INTERVAL_MS: u64 = 1_500;
pub(crate) const LOG_LEVEL: &str = "info";

pub(crate) const MIN_SCHEDULER_STEP_MS: u64 = 10;
pub(crate) const MAX_SCHEDULER_STEP_MS: u64 = 5_000;
pub(crate) const MIN_INTERVAL_MS: u64 = 50;
/// One hour.
pub(crate) const MAX_INTERVAL_MS: u64 = 3_600_000;
pub(crate) const MAX_SETTLE_MULTIPLIER: u32 = 600;
