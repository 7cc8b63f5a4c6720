//! Serialisable recovery profile as stored in configuration documents.

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Recovery settings as written by the operator.
///
/// Values are raw; use [`crate::normalize_recovery_profile`] to obtain the clamped view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryProfile {
    /// Where the engine runs (`local` or `remote`).
    pub host_mode: String,
    /// Scheduler tick step in milliseconds.
    pub scheduler_step_ms: u64,
    /// Sequencer base interval in milliseconds.
    pub base_interval_ms: u64,
    /// Settle deadline as a multiple of the base interval.
    pub settle_multiplier: u32,
    /// Baseline poller cadence in milliseconds.
    pub probe_interval_ms: u64,
    /// Volume poller cadence in milliseconds.
    pub volume_interval_ms: u64,
    /// Prompt poller cadence in milliseconds.
    pub prompt_retry_interval_ms: u64,
    /// Free-space floor at or below which a location counts as full.
    pub min_free_bytes: u64,
    /// Log level directive used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Log output format (`json` or `pretty`); empty selects the build default.
    pub log_format: String,
}

impl Default for RecoveryProfile {
    fn default() -> Self {
        Self {
            host_mode: "local".to_string(),
            scheduler_step_ms: defaults::SCHEDULER_STEP_MS,
            base_interval_ms: defaults::BASE_INTERVAL_MS,
            settle_multiplier: defaults::SETTLE_MULTIPLIER,
            probe_interval_ms: defaults::PROBE_INTERVAL_MS,
            volume_interval_ms: defaults::VOLUME_INTERVAL_MS,
            prompt_retry_interval_ms: defaults::PROMPT_RETRY_INTERVAL_MS,
            min_free_bytes: 0,
            log_level: defaults::LOG_LEVEL.to_string(),
            log_format: String::new(),
        }
    }
}
