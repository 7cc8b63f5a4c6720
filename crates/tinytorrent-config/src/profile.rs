//! Recovery profile normalisation.
//!
//! # Design
//! - Clamps cadences to guard rails instead of rejecting the profile.
//! - Surfaces an "effective" view with typed durations plus warnings for observability.

use std::time::Duration;

use serde::Serialize;
use tinytorrent_recovery_core::HostMode;

use crate::defaults;
use crate::model::RecoveryProfile;

/// Effective recovery configuration after applying guard rails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryProfileEffective {
    /// Where the engine runs.
    pub host_mode: HostMode,
    /// Scheduler tick step.
    pub scheduler_step: Duration,
    /// Sequencer base interval.
    pub base_interval: Duration,
    /// Settle deadline as a multiple of the base interval.
    pub settle_multiplier: u32,
    /// Baseline poller cadence.
    pub probe_interval: Duration,
    /// Volume poller cadence.
    pub volume_interval: Duration,
    /// Prompt poller cadence.
    pub prompt_retry_interval: Duration,
    /// Free-space floor at or below which a location counts as full.
    pub min_free_bytes: u64,
    /// Logging settings.
    pub logging: LoggingProfile,
    /// Guard-rail or normalisation warnings applied to the profile.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RecoveryProfileEffective {
    /// Deadline after which a settle loop gives up.
    #[must_use]
    pub fn settle_timeout(&self) -> Duration {
        self.base_interval.saturating_mul(self.settle_multiplier)
    }
}

impl Default for RecoveryProfileEffective {
    fn default() -> Self {
        normalize_recovery_profile(&RecoveryProfile::default())
    }
}

/// Canonical logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggingProfile {
    /// Log level directive.
    pub level: String,
    /// `json`, `pretty`, or `None` for the build default.
    pub format: Option<String>,
}

/// Produce the effective recovery configuration for the runtime.
#[must_use]
pub fn normalize_recovery_profile(profile: &RecoveryProfile) -> RecoveryProfileEffective {
    let mut warnings = Vec::new();

    let host_mode = canonical_host_mode(&profile.host_mode, &mut warnings);
    let scheduler_step_ms = clamp_ms(
        "scheduler_step_ms",
        profile.scheduler_step_ms,
        defaults::MIN_SCHEDULER_STEP_MS,
        defaults::MAX_SCHEDULER_STEP_MS,
        &mut warnings,
    );
    let base_interval_ms = clamp_ms(
        "base_interval_ms",
        profile.base_interval_ms,
        defaults::MIN_INTERVAL_MS,
        defaults::MAX_INTERVAL_MS,
        &mut warnings,
    );
    let settle_multiplier = match profile.settle_multiplier {
        0 => {
            warnings.push("settle_multiplier of 0 requested; using 1".to_string());
            1
        }
        value if value > defaults::MAX_SETTLE_MULTIPLIER => {
            warnings.push(format!(
                "settle_multiplier of {value} exceeds guard rail; clamping to {}",
                defaults::MAX_SETTLE_MULTIPLIER
            ));
            defaults::MAX_SETTLE_MULTIPLIER
        }
        value => value,
    };
    let probe_interval_ms = poller_interval(
        "probe_interval_ms",
        profile.probe_interval_ms,
        scheduler_step_ms,
        &mut warnings,
    );
    let volume_interval_ms = poller_interval(
        "volume_interval_ms",
        profile.volume_interval_ms,
        scheduler_step_ms,
        &mut warnings,
    );
    let prompt_retry_interval_ms = poller_interval(
        "prompt_retry_interval_ms",
        profile.prompt_retry_interval_ms,
        scheduler_step_ms,
        &mut warnings,
    );

    let level = profile.log_level.trim();
    let level = if level.is_empty() {
        warnings.push(format!(
            "log_level was empty; using {}",
            defaults::LOG_LEVEL
        ));
        defaults::LOG_LEVEL.to_string()
    } else {
        level.to_string()
    };
    let format = canonical_log_format(&profile.log_format, &mut warnings);

    RecoveryProfileEffective {
        host_mode,
        scheduler_step: Duration::from_millis(scheduler_step_ms),
        base_interval: Duration::from_millis(base_interval_ms),
        settle_multiplier,
        probe_interval: Duration::from_millis(probe_interval_ms),
        volume_interval: Duration::from_millis(volume_interval_ms),
        prompt_retry_interval: Duration::from_millis(prompt_retry_interval_ms),
        min_free_bytes: profile.min_free_bytes,
        logging: LoggingProfile { level, format },
        warnings,
    }
}

fn canonical_host_mode(raw: &str, warnings: &mut Vec<String>) -> HostMode {
    match raw.trim().to_ascii_lowercase().as_str() {
        "local" | "" => HostMode::Local,
        "remote" => HostMode::Remote,
        other => {
            warnings.push(format!("unknown host_mode '{other}'; defaulting to 'local'"));
            HostMode::Local
        }
    }
}

fn canonical_log_format(raw: &str, warnings: &mut Vec<String>) -> Option<String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => None,
        value @ ("json" | "pretty") => Some(value.to_string()),
        other => {
            warnings.push(format!(
                "unknown log_format '{other}'; using the build default"
            ));
            None
        }
    }
}

fn clamp_ms(field: &str, value: u64, min: u64, max: u64, warnings: &mut Vec<String>) -> u64 {
    if value < min {
        warnings.push(format!(
            "{field} of {value} is below guard rail; raising to {min}"
        ));
        min
    } else if value > max {
        warnings.push(format!(
            "{field} of {value} exceeds guard rail; clamping to {max}"
        ));
        max
    } else {
        value
    }
}

fn poller_interval(field: &str, value: u64, step_ms: u64, warnings: &mut Vec<String>) -> u64 {
    let floor = step_ms.max(defaults::MIN_INTERVAL_MS);
    clamp_ms(field, value, floor, defaults::MAX_INTERVAL_MS, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_normalise_without_warnings() {
        let effective = normalize_recovery_profile(&RecoveryProfile::default());
        assert!(effective.warnings.is_empty(), "{:?}", effective.warnings);
        assert_eq!(effective.host_mode, HostMode::Local);
        assert_eq!(effective.scheduler_step, Duration::from_millis(250));
        assert_eq!(effective.settle_timeout(), Duration::from_secs(10));
        assert_eq!(effective.logging.level, "info");
        assert!(effective.logging.format.is_none());
    }

    #[test]
    fn out_of_range_values_are_clamped_with_warnings() {
        let profile = RecoveryProfile {
            host_mode: "cloud".into(),
            scheduler_step_ms: 1,
            base_interval_ms: 10_000_000,
            settle_multiplier: 0,
            probe_interval_ms: 5,
            log_level: "  ".into(),
            log_format: "xml".into(),
            ..RecoveryProfile::default()
        };
        let effective = normalize_recovery_profile(&profile);

        assert_eq!(effective.host_mode, HostMode::Local);
        assert_eq!(effective.scheduler_step, Duration::from_millis(10));
        assert_eq!(effective.base_interval, Duration::from_millis(3_600_000));
        assert_eq!(effective.settle_multiplier, 1);
        assert_eq!(effective.probe_interval, Duration::from_millis(50));
        assert_eq!(effective.logging.level, "info");
        assert!(effective.logging.format.is_none());
        assert_eq!(effective.warnings.len(), 7, "{:?}", effective.warnings);
    }

    #[test]
    fn poller_intervals_never_undercut_the_scheduler_step() {
        let profile = RecoveryProfile {
            scheduler_step_ms: 1_000,
            volume_interval_ms: 200,
            ..RecoveryProfile::default()
        };
        let effective = normalize_recovery_profile(&profile);
        assert_eq!(effective.volume_interval, Duration::from_millis(1_000));
        assert_eq!(effective.warnings.len(), 1);
    }

    #[test]
    fn remote_mode_and_json_format_are_canonicalised() {
        let profile = RecoveryProfile {
            host_mode: "Remote".into(),
            log_format: "JSON".into(),
            ..RecoveryProfile::default()
        };
        let effective = normalize_recovery_profile(&profile);
        assert_eq!(effective.host_mode, HostMode::Remote);
        assert_eq!(effective.logging.format.as_deref(), Some("json"));
        assert!(effective.warnings.is_empty());
    }
}
