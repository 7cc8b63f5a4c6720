//! Recovery sequencing: probe, classify, mutate, then settle.
//!
//! # Design
//! - Every engine failure is converted into an `Error` outcome at [`RecoverySequencer::execute`];
//!   nothing escapes to the gate.
//! - Retry-only requests never call a mutating engine operation.
//! - Redownload and folder recreation run inside the idempotency guard keyed by fingerprint.
//! - Settle waits are scheduled on the cooperative scheduler, so every deadline is a multiple
//!   of the base interval.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tinytorrent_config::RecoveryProfileEffective;
use tinytorrent_recovery_core::{
    FaultClassification, FaultDescriptor, FaultKind, Fingerprint, HostProbe, PathProbe,
    PathReason, RecoveryAction, RecoveryEngine, RecoveryOptions, RecoveryOutcome,
    TorrentActivity,
};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classifier::{blocking_reason, classify, probe_path};
use crate::error::{RecoveryError, RecoveryResult};
use crate::guard::IdempotencyGuard;
use crate::scheduler::Scheduler;

const UNSETTLED_DETAIL: &str = "engine did not leave faulted state";

/// Timing and threshold inputs for the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerSettings {
    /// Interval between settle polls.
    pub base_interval: Duration,
    /// Settle deadline as a multiple of `base_interval`.
    pub settle_multiplier: u32,
    /// Free-space floor at or below which a location counts as full.
    pub min_free_bytes: u64,
}

impl SequencerSettings {
    /// Settings taken from an effective profile.
    #[must_use]
    pub const fn from_profile(profile: &RecoveryProfileEffective) -> Self {
        Self {
            base_interval: profile.base_interval,
            settle_multiplier: profile.settle_multiplier,
            min_free_bytes: profile.min_free_bytes,
        }
    }

    /// Time after which a settle loop gives up.
    #[must_use]
    pub const fn settle_timeout(&self) -> Duration {
        self.base_interval.saturating_mul(self.settle_multiplier)
    }
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self::from_profile(&RecoveryProfileEffective::default())
    }
}

/// Snapshot of a faulted torrent: descriptor, probe, and classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    /// Descriptor reported by the engine.
    pub descriptor: FaultDescriptor,
    /// Fingerprint sessions are keyed on.
    pub fingerprint: Fingerprint,
    /// Probe taken for the descriptor's path.
    pub probe: PathProbe,
    /// Classification derived from the descriptor and probe.
    pub classification: FaultClassification,
    /// Why the location is unusable, if it is.
    pub blocking: Option<PathReason>,
}

/// Executes recovery actions against the engine.
#[derive(Clone)]
pub struct RecoverySequencer {
    engine: Arc<dyn RecoveryEngine>,
    host: Arc<dyn HostProbe>,
    scheduler: Scheduler,
    guard: IdempotencyGuard,
    settings: SequencerSettings,
}

impl RecoverySequencer {
    /// Build a sequencer over `engine` and `host`.
    #[must_use]
    pub fn new(
        engine: Arc<dyn RecoveryEngine>,
        host: Arc<dyn HostProbe>,
        scheduler: Scheduler,
        settings: SequencerSettings,
    ) -> Self {
        Self {
            engine,
            host,
            scheduler,
            guard: IdempotencyGuard::new(),
            settings,
        }
    }

    /// Engine adapter in use.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn RecoveryEngine> {
        &self.engine
    }

    /// Host probe in use.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn HostProbe> {
        &self.host
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &SequencerSettings {
        &self.settings
    }

    /// Fetch, probe, and classify the fault on `target`. `None` when it is not faulted.
    ///
    /// # Errors
    ///
    /// Returns an error when the descriptor cannot be fetched.
    pub async fn assess(&self, target: Uuid) -> RecoveryResult<Option<Assessment>> {
        let descriptor = self
            .engine
            .fault_descriptor(target)
            .await
            .map_err(RecoveryError::engine("fault_descriptor"))?;
        let Some(descriptor) = descriptor else {
            return Ok(None);
        };
        let probe = probe_path(self.engine.as_ref(), self.host.as_ref(), &descriptor.path).await;
        let classification = classify(&descriptor, &probe, self.host.mode());
        let blocking = blocking_reason(&classification, &probe, self.settings.min_free_bytes);
        let fingerprint = descriptor.fingerprint_for(target);
        debug!(
            torrent_id = %target,
            fingerprint = %fingerprint,
            kind = classification.kind.as_str(),
            blocking = ?blocking,
            "fault assessed"
        );
        Ok(Some(Assessment {
            descriptor,
            fingerprint,
            probe,
            classification,
            blocking,
        }))
    }

    /// Run `action` for `target` and report how it settled.
    pub async fn execute(
        &self,
        target: Uuid,
        action: &RecoveryAction,
        options: RecoveryOptions,
    ) -> RecoveryOutcome {
        match self.try_execute(target, action, options).await {
            Ok(outcome) => {
                info!(
                    torrent_id = %target,
                    action = action.as_str(),
                    outcome = outcome.as_str(),
                    "recovery attempt finished"
                );
                outcome
            }
            Err(err) => {
                warn!(
                    torrent_id = %target,
                    action = action.as_str(),
                    error = %err.detail(),
                    "recovery attempt failed"
                );
                RecoveryOutcome::Error {
                    detail: err.detail(),
                }
            }
        }
    }

    /// Probe and classify without mutating engine state.
    pub async fn probe_only(&self, target: Uuid) -> RecoveryOutcome {
        let options = RecoveryOptions {
            retry_only: true,
            ..RecoveryOptions::default()
        };
        self.execute(target, &RecoveryAction::Recheck, options).await
    }

    async fn try_execute(
        &self,
        target: Uuid,
        action: &RecoveryAction,
        options: RecoveryOptions,
    ) -> RecoveryResult<RecoveryOutcome> {
        if options.retry_only {
            return self.retry_only(target).await;
        }
        match action {
            RecoveryAction::Remove { delete_data } => {
                self.engine
                    .remove(&[target], *delete_data)
                    .await
                    .map_err(RecoveryError::engine("remove"))?;
                return Ok(RecoveryOutcome::Resolved);
            }
            RecoveryAction::SetLocation { path, move_data } => {
                return self.relocate(target, path, *move_data).await;
            }
            RecoveryAction::Resume | RecoveryAction::Recheck | RecoveryAction::Redownload => {}
        }

        let Some(assessment) = self.assess(target).await? else {
            return Ok(RecoveryOutcome::Noop);
        };
        if options.recreate_folder {
            return self
                .guarded(&assessment.fingerprint, || {
                    self.recreate_folder(target, &assessment.descriptor.path)
                })
                .await;
        }
        match action {
            RecoveryAction::Redownload => {
                self.guarded(&assessment.fingerprint, || self.redownload(target, &assessment))
                    .await
            }
            RecoveryAction::Recheck if assessment.classification.kind == FaultKind::DataGap => {
                self.verify(target).await
            }
            _ => match assessment.blocking {
                Some(reason) => Ok(RecoveryOutcome::PathNeeded { reason }),
                None => self.resume_and_settle(target).await,
            },
        }
    }

    async fn retry_only(&self, target: Uuid) -> RecoveryResult<RecoveryOutcome> {
        let outcome = match self.assess(target).await? {
            Some(Assessment {
                blocking: Some(reason),
                ..
            }) => RecoveryOutcome::PathNeeded { reason },
            Some(_) | None => RecoveryOutcome::Noop,
        };
        Ok(outcome)
    }

    async fn guarded<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        operation: F,
    ) -> RecoveryResult<RecoveryOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RecoveryResult<RecoveryOutcome>>,
    {
        match self.guard.run(fingerprint.as_str(), operation).await {
            Some(result) => result,
            None => {
                info!(fingerprint = %fingerprint, "duplicate recovery mutation suppressed");
                Ok(RecoveryOutcome::Noop)
            }
        }
    }

    async fn redownload(
        &self,
        target: Uuid,
        assessment: &Assessment,
    ) -> RecoveryResult<RecoveryOutcome> {
        if assessment.classification.kind == FaultKind::DataGap {
            return self.verify(target).await;
        }
        match assessment.blocking {
            Some(reason) => Ok(RecoveryOutcome::PathNeeded { reason }),
            None => self.resume_and_settle(target).await,
        }
    }

    async fn recreate_folder(&self, target: Uuid, path: &str) -> RecoveryResult<RecoveryOutcome> {
        self.host
            .create_directory(path)
            .map_err(|source| RecoveryError::Host {
                operation: "create_directory",
                path: path.to_string(),
                source,
            })?;
        info!(torrent_id = %target, path, "download folder recreated");
        self.relocate(target, path, false).await
    }

    async fn relocate(
        &self,
        target: Uuid,
        path: &str,
        move_data: bool,
    ) -> RecoveryResult<RecoveryOutcome> {
        self.engine
            .set_location(target, path, move_data)
            .await
            .map_err(RecoveryError::engine("set_location"))?;
        self.resume_and_settle(target).await
    }

    async fn verify(&self, target: Uuid) -> RecoveryResult<RecoveryOutcome> {
        self.engine
            .verify(target)
            .await
            .map_err(RecoveryError::engine("verify"))?;
        Ok(RecoveryOutcome::VerifyStarted)
    }

    async fn resume_and_settle(&self, target: Uuid) -> RecoveryResult<RecoveryOutcome> {
        self.engine
            .resume(&[target])
            .await
            .map_err(RecoveryError::engine("resume"))?;
        self.settle(target).await
    }

    async fn settle(&self, target: Uuid) -> RecoveryResult<RecoveryOutcome> {
        let deadline = Instant::now() + self.settings.settle_timeout();
        loop {
            let descriptor = self
                .engine
                .fault_descriptor(target)
                .await
                .map_err(RecoveryError::engine("fault_descriptor"))?;
            let activity = self
                .engine
                .activity(target)
                .await
                .map_err(RecoveryError::engine("activity"))?;
            match activity {
                TorrentActivity::Checking => return Ok(RecoveryOutcome::VerifyStarted),
                TorrentActivity::Announcing => return Ok(RecoveryOutcome::ReannounceStarted),
                TorrentActivity::Active if descriptor.is_none() => {
                    return Ok(RecoveryOutcome::Resolved);
                }
                _ => {}
            }
            if Instant::now() >= deadline || !self.pause(self.settings.base_interval).await {
                break;
            }
        }

        debug!(torrent_id = %target, "settle deadline passed");
        let outcome = match self.assess(target).await? {
            Some(Assessment {
                blocking: Some(reason),
                ..
            }) => RecoveryOutcome::PathNeeded { reason },
            Some(_) => RecoveryOutcome::Error {
                detail: UNSETTLED_DETAIL.to_string(),
            },
            None => RecoveryOutcome::Noop,
        };
        Ok(outcome)
    }

    /// Wait `delay` on the scheduler. Returns `false` when the scheduler dropped the wait.
    async fn pause(&self, delay: Duration) -> bool {
        let (sender, receiver) = oneshot::channel();
        let handle = self.scheduler.schedule_timeout(delay, move || async move {
            let _ = sender.send(());
            Ok(())
        });
        let woke = receiver.await.is_ok();
        if !woke {
            handle.cancel();
        }
        woke
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinytorrent_recovery_core::FsErrorKind;
    use tinytorrent_test_support::{
        FakeEngine, FakeHost, disk_full, hash_mismatch, missing_files,
    };

    const TARGET: Uuid = Uuid::from_u128(7);

    fn settings() -> SequencerSettings {
        SequencerSettings {
            base_interval: Duration::from_millis(500),
            settle_multiplier: 4,
            min_free_bytes: 0,
        }
    }

    fn sequencer(engine: &Arc<FakeEngine>, host: &Arc<FakeHost>) -> RecoverySequencer {
        let engine: Arc<dyn RecoveryEngine> = Arc::clone(engine) as Arc<dyn RecoveryEngine>;
        let host: Arc<dyn HostProbe> = Arc::clone(host) as Arc<dyn HostProbe>;
        RecoverySequencer::new(
            engine,
            host,
            Scheduler::new(Duration::from_millis(100)),
            settings(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retry_only_never_mutates() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::local());
        engine.set_fault(TARGET, missing_files("/data/dl", "fp"));
        let sequencer = sequencer(&engine, &host);

        assert_eq!(
            sequencer.probe_only(TARGET).await,
            RecoveryOutcome::PathNeeded {
                reason: PathReason::Missing
            }
        );
        host.add_path("/data/dl");
        assert_eq!(sequencer.probe_only(TARGET).await, RecoveryOutcome::Noop);
        assert_eq!(engine.mutating_calls(), 0);
        assert!(engine.free_space_queries() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_settles_to_resolved() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::local());
        host.add_path("/data/dl");
        engine.set_fault(TARGET, missing_files("/data/dl", "fp"));

        let outcome = sequencer(&engine, &host)
            .execute(TARGET, &RecoveryAction::Resume, RecoveryOptions::default())
            .await;
        assert_eq!(outcome, RecoveryOutcome::Resolved);
        assert_eq!(engine.resume_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_location_needs_a_path() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::local());
        host.add_path("/data/dl");
        engine.set_fault(TARGET, disk_full("/data/dl", "fp"));
        engine.set_free_space("/data/dl", 0);

        let outcome = sequencer(&engine, &host)
            .execute(TARGET, &RecoveryAction::Recheck, RecoveryOptions::default())
            .await;
        assert_eq!(
            outcome,
            RecoveryOutcome::PathNeeded {
                reason: PathReason::DiskFull
            }
        );
        assert_eq!(engine.mutating_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn data_gap_recheck_starts_verification() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::local());
        engine.set_fault(TARGET, hash_mismatch("/data/dl", "fp"));

        let outcome = sequencer(&engine, &host)
            .execute(TARGET, &RecoveryAction::Recheck, RecoveryOptions::default())
            .await;
        assert_eq!(outcome, RecoveryOutcome::VerifyStarted);
        assert_eq!(engine.verify_calls(), 1);
        assert_eq!(engine.resume_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_reports_engine_activity_after_resume() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::local());
        host.add_path("/data/dl");
        let sequencer = sequencer(&engine, &host);

        engine.set_fault(TARGET, missing_files("/data/dl", "fp"));
        engine.set_resume_activity(TorrentActivity::Checking);
        assert_eq!(
            sequencer
                .execute(TARGET, &RecoveryAction::Resume, RecoveryOptions::default())
                .await,
            RecoveryOutcome::VerifyStarted
        );

        engine.set_fault(TARGET, missing_files("/data/dl", "fp"));
        engine.set_resume_activity(TorrentActivity::Announcing);
        assert_eq!(
            sequencer
                .execute(TARGET, &RecoveryAction::Resume, RecoveryOptions::default())
                .await,
            RecoveryOutcome::ReannounceStarted
        );
        assert_eq!(engine.resume_calls(), 2);
        assert_eq!(engine.verify_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unsettled_engine_times_out_with_error() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::local());
        host.add_path("/data/dl");
        engine.set_fault(TARGET, missing_files("/data/dl", "fp"));
        engine.set_resume_clears_fault(false);

        let started = Instant::now();
        let outcome = sequencer(&engine, &host)
            .execute(TARGET, &RecoveryAction::Resume, RecoveryOptions::default())
            .await;
        assert_eq!(
            outcome,
            RecoveryOutcome::Error {
                detail: UNSETTLED_DETAIL.to_string()
            }
        );
        assert!(started.elapsed() >= settings().settle_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn engine_failures_become_error_outcomes() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::local());
        host.add_path("/data/dl");
        engine.set_fault(TARGET, missing_files("/data/dl", "fp"));
        engine.fail_operation("resume", FsErrorKind::AccessDenied);

        let outcome = sequencer(&engine, &host)
            .execute(TARGET, &RecoveryAction::Resume, RecoveryOptions::default())
            .await;
        let RecoveryOutcome::Error { detail } = outcome else {
            panic!("expected error outcome, got {outcome:?}");
        };
        assert!(detail.contains("resume"));
    }

    #[tokio::test(start_paused = true)]
    async fn recreate_folder_relocates_and_resumes() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::local());
        engine.set_fault(TARGET, missing_files("/data/dl", "fp"));
        let options = RecoveryOptions {
            recreate_folder: true,
            retry_only: false,
        };

        let outcome = sequencer(&engine, &host)
            .execute(TARGET, &RecoveryAction::Resume, options)
            .await;
        assert_eq!(outcome, RecoveryOutcome::Resolved);
        assert_eq!(host.created_directories(), vec!["/data/dl".to_string()]);
        assert_eq!(engine.set_location_calls(), 1);
        assert_eq!(engine.resume_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recreate_folder_on_remote_host_fails_cleanly() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::remote());
        engine.set_fault(TARGET, missing_files("/srv/dl", "fp"));
        let options = RecoveryOptions {
            recreate_folder: true,
            retry_only: false,
        };

        let outcome = sequencer(&engine, &host)
            .execute(TARGET, &RecoveryAction::Resume, options)
            .await;
        assert!(matches!(outcome, RecoveryOutcome::Error { .. }));
        assert_eq!(engine.mutating_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn set_location_and_remove_skip_classification() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::local());
        engine.set_fault(TARGET, missing_files("/data/dl", "fp"));
        let sequencer = sequencer(&engine, &host);

        let moved = sequencer
            .execute(
                TARGET,
                &RecoveryAction::SetLocation {
                    path: "/data/new".into(),
                    move_data: true,
                },
                RecoveryOptions::default(),
            )
            .await;
        assert_eq!(moved, RecoveryOutcome::Resolved);
        assert_eq!(engine.set_location_calls(), 1);

        let removed = sequencer
            .execute(
                TARGET,
                &RecoveryAction::Remove { delete_data: false },
                RecoveryOptions::default(),
            )
            .await;
        assert_eq!(removed, RecoveryOutcome::Resolved);
        assert_eq!(engine.remove_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_fault_is_a_noop() {
        let engine = Arc::new(FakeEngine::new());
        let host = Arc::new(FakeHost::local());
        let outcome = sequencer(&engine, &host)
            .execute(TARGET, &RecoveryAction::Redownload, RecoveryOptions::default())
            .await;
        assert_eq!(outcome, RecoveryOutcome::Noop);
        assert_eq!(engine.mutating_calls(), 0);
    }
}
