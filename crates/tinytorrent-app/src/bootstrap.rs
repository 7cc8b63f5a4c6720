//! Recovery runtime wiring.
//!
//! # Design
//! - The scheduler is constructed here and injected into the sequencer and the poller; there
//!   is no process-wide timer.
//! - Dependencies are injected so tests can substitute engine and host doubles.

use std::sync::Arc;

use tinytorrent_config::{RecoveryProfile, RecoveryProfileEffective, normalize_recovery_profile};
use tinytorrent_events::{Event, EventBus};
use tinytorrent_recovery::{
    AmbientPoller, PollerCadence, RecoveryOrchestrator, RecoverySequencer, Scheduler,
    SequencerSettings, host_for,
};
use tinytorrent_recovery_core::{
    GateOutcome, HostProbe, RecoveryEngine, RecoveryOutcome, RecoveryRequest,
};
use tinytorrent_telemetry::{LogFormat, LoggingConfig, Metrics};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

const BUILD_SHA: &str = match option_env!("TINYTORRENT_BUILD_SHA") {
    Some(sha) => sha,
    None => "dev",
};

/// Dependencies required to start the recovery runtime.
pub struct RuntimeDependencies {
    engine: Arc<dyn RecoveryEngine>,
    host: Option<Arc<dyn HostProbe>>,
    profile: RecoveryProfile,
    events: EventBus,
    install_logging: bool,
}

impl RuntimeDependencies {
    /// Dependencies for `engine` with an explicit profile.
    #[must_use]
    pub fn new(engine: Arc<dyn RecoveryEngine>, profile: RecoveryProfile) -> Self {
        Self {
            engine,
            host: None,
            profile,
            events: EventBus::new(),
            install_logging: true,
        }
    }

    /// Dependencies for `engine` with the profile loaded from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration file or an override is invalid.
    pub fn from_env(engine: Arc<dyn RecoveryEngine>) -> AppResult<Self> {
        let profile =
            RecoveryProfile::from_env().map_err(|err| AppError::config("profile.from_env", err))?;
        Ok(Self::new(engine, profile))
    }

    /// Use `host` instead of the probe matching the configured host mode.
    #[must_use]
    pub fn with_host(mut self, host: Arc<dyn HostProbe>) -> Self {
        self.host = Some(host);
        self
    }

    /// Publish on an existing event bus.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Leave the global tracing subscriber untouched.
    #[must_use]
    pub fn without_logging(mut self) -> Self {
        self.install_logging = false;
        self
    }
}

/// Running recovery components.
pub struct RecoveryRuntime {
    profile: RecoveryProfileEffective,
    scheduler: Scheduler,
    orchestrator: RecoveryOrchestrator,
    poller: AmbientPoller,
    metrics: Metrics,
}

impl RecoveryRuntime {
    /// Install logging, build every component from the effective profile, and start polling.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error when logging cannot be installed or metrics cannot be registered.
    pub fn start(dependencies: RuntimeDependencies) -> AppResult<Self> {
        let RuntimeDependencies {
            engine,
            host,
            profile,
            events,
            install_logging,
        } = dependencies;
        let effective = normalize_recovery_profile(&profile);

        if install_logging {
            let format = effective
                .logging
                .format
                .as_deref()
                .map_or_else(LogFormat::infer, LogFormat::from_label);
            tinytorrent_telemetry::init_logging(&LoggingConfig {
                level: &effective.logging.level,
                format,
                build_sha: BUILD_SHA,
            })
            .map_err(|err| AppError::telemetry("telemetry.init", err))?;
        }
        for warning in &effective.warnings {
            warn!(warning = %warning, "recovery profile adjusted");
        }

        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        let scheduler = Scheduler::with_metrics(effective.scheduler_step, metrics.clone());
        let host = host.unwrap_or_else(|| Arc::from(host_for(effective.host_mode)));
        let sequencer = RecoverySequencer::new(
            engine,
            host,
            scheduler.clone(),
            SequencerSettings::from_profile(&effective),
        );
        let orchestrator =
            RecoveryOrchestrator::with_metrics(sequencer, events.clone(), metrics.clone());
        let poller = AmbientPoller::new(
            orchestrator.clone(),
            scheduler.clone(),
            PollerCadence::from_profile(&effective),
        );
        poller.start();

        events.publish(Event::SettingsChanged {
            description: describe(&effective),
        });
        if !effective.warnings.is_empty() {
            events.publish(Event::HealthChanged {
                degraded: vec!["recovery_profile".to_string()],
            });
        }
        info!(
            host_mode = effective.host_mode.as_str(),
            step_ms = effective.scheduler_step.as_millis(),
            "recovery runtime started"
        );

        Ok(Self {
            profile: effective,
            scheduler,
            orchestrator,
            poller,
            metrics,
        })
    }

    /// Handle a recovery request through the orchestrator.
    pub async fn request_recovery(&self, request: RecoveryRequest) -> Option<GateOutcome> {
        self.orchestrator.request_recovery(request).await
    }

    /// Probe and classify `target` without mutating anything.
    pub async fn probe_only(&self, target: Uuid) -> RecoveryOutcome {
        self.orchestrator.probe_only(target).await
    }

    /// Apply the poller cadence from `profile` to the running loops.
    ///
    /// Scheduler step and sequencer timing are fixed for the runtime's lifetime.
    pub fn apply_profile(&mut self, profile: &RecoveryProfile) {
        let effective = normalize_recovery_profile(profile);
        self.poller
            .update_cadence(PollerCadence::from_profile(&effective));
        self.orchestrator.events().publish(Event::SettingsChanged {
            description: describe(&effective),
        });
        self.profile.probe_interval = effective.probe_interval;
        self.profile.volume_interval = effective.volume_interval;
        self.profile.prompt_retry_interval = effective.prompt_retry_interval;
    }

    /// Effective profile in use.
    #[must_use]
    pub const fn profile(&self) -> &RecoveryProfileEffective {
        &self.profile
    }

    /// Orchestrator accepting recovery requests.
    #[must_use]
    pub const fn orchestrator(&self) -> &RecoveryOrchestrator {
        &self.orchestrator
    }

    /// Ambient poller.
    #[must_use]
    pub const fn poller(&self) -> &AmbientPoller {
        &self.poller
    }

    /// Shared scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Metrics registry.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        self.orchestrator.events()
    }

    /// Stop the poller loops and the scheduler.
    pub fn shutdown(&self) {
        self.poller.shutdown();
        self.scheduler.shutdown();
        info!("recovery runtime stopped");
    }
}

fn describe(profile: &RecoveryProfileEffective) -> String {
    format!(
        "host_mode={} probe_ms={} volume_ms={} prompt_ms={}",
        profile.host_mode.as_str(),
        profile.probe_interval.as_millis(),
        profile.volume_interval.as_millis(),
        profile.prompt_retry_interval.as_millis(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tinytorrent_recovery_core::{PathReason, RecoveryAction};
    use tinytorrent_test_support::{FakeEngine, FakeHost, disk_full, missing_files};

    const TARGET: Uuid = Uuid::from_u128(0x51);

    fn profile() -> RecoveryProfile {
        RecoveryProfile {
            scheduler_step_ms: 100,
            base_interval_ms: 200,
            probe_interval_ms: 1_000,
            volume_interval_ms: 500,
            ..RecoveryProfile::default()
        }
    }

    fn start(engine: &Arc<FakeEngine>, host: &Arc<FakeHost>, profile: RecoveryProfile) -> RecoveryRuntime {
        let dependencies = RuntimeDependencies::new(
            Arc::clone(engine) as Arc<dyn RecoveryEngine>,
            profile,
        )
        .with_host(Arc::clone(host) as Arc<dyn HostProbe>)
        .without_logging();
        RecoveryRuntime::start(dependencies).expect("runtime starts")
    }

    #[tokio::test(start_paused = true)]
    async fn start_wires_loops_and_shutdown_stops_them() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::local());
        let runtime = start(&engine, &host, profile());

        assert!(runtime.poller().is_running());
        assert_eq!(runtime.scheduler().pending(), 2);
        assert_eq!(runtime.profile().scheduler_step, Duration::from_millis(100));
        assert!(
            runtime
                .events()
                .recent()
                .iter()
                .any(|envelope| envelope.event.kind() == "settings_changed")
        );

        runtime.shutdown();
        assert!(!runtime.poller().is_running());
        assert_eq!(runtime.scheduler().pending(), 0);
        assert!(!runtime.scheduler().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn clamped_profile_reports_degraded_health() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::remote());
        let runtime = start(
            &engine,
            &host,
            RecoveryProfile {
                scheduler_step_ms: 1,
                ..profile()
            },
        );
        assert!(!runtime.profile().warnings.is_empty());
        assert!(
            runtime
                .events()
                .recent()
                .iter()
                .any(|envelope| envelope.event.kind() == "health_changed")
        );
        assert_eq!(runtime.scheduler().pending(), 1);
        runtime.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn runtime_recovers_disk_full_without_a_request() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::local());
        host.add_path("/data/dl");
        engine.set_fault(TARGET, disk_full("/data/dl", "fp"));
        engine.set_free_space("/data/dl", 0);
        let runtime = start(&engine, &host, profile());

        assert_eq!(
            runtime.probe_only(TARGET).await,
            RecoveryOutcome::PathNeeded {
                reason: PathReason::DiskFull
            }
        );
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(engine.resume_calls(), 0);

        engine.set_free_space("/data/dl", 1 << 30);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(engine.fault(TARGET).is_none());
        assert_eq!(engine.resume_calls(), 1);
        assert_eq!(runtime.metrics().outcome_count("resolved"), 1);
        runtime.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn interactive_requests_flow_through_the_runtime() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::local());
        engine.set_fault(TARGET, missing_files("/data/dl", "fp"));
        let mut runtime = start(&engine, &host, profile());

        let outcome = runtime
            .request_recovery(RecoveryRequest::interactive(TARGET, RecoveryAction::Resume))
            .await;
        assert_eq!(
            outcome,
            Some(GateOutcome::Continue {
                outcome: RecoveryOutcome::PathNeeded {
                    reason: PathReason::Missing
                }
            })
        );

        runtime.apply_profile(&RecoveryProfile {
            probe_interval_ms: 10_000,
            ..profile()
        });
        assert_eq!(runtime.profile().probe_interval, Duration::from_secs(10));
        runtime.shutdown();
    }
}
