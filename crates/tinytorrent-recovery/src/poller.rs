//! Background re-classification of faulted torrents.
//!
//! # Design
//! - Three recurring loops on the shared scheduler: baseline, volume (local hosts only), and
//!   prompt (only while an interactive prompt is open).
//! - A target flipping from blocking to non-blocking triggers one ambient `recheck` through
//!   the orchestrator. The first observation of a target counts as blocking.
//! - A recheck the gate cancels (another session held the slot) puts the target back to
//!   blocking, so the next tick flips it again.
//! - Loop callbacks hold a weak reference, so dropping the poller stops them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tinytorrent_config::RecoveryProfileEffective;
use tinytorrent_events::Event;
use tinytorrent_recovery_core::{FaultKind, GateOutcome, RecoveryRequest};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::orchestrator::RecoveryOrchestrator;
use crate::scheduler::{RecurringHandle, Scheduler};
use crate::sequencer::Assessment;

/// Intervals for the poller loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerCadence {
    /// Baseline loop interval.
    pub probe_interval: Duration,
    /// Volume loop interval.
    pub volume_interval: Duration,
    /// Prompt loop interval.
    pub prompt_retry_interval: Duration,
}

impl PollerCadence {
    /// Cadence taken from an effective profile.
    #[must_use]
    pub const fn from_profile(profile: &RecoveryProfileEffective) -> Self {
        Self {
            probe_interval: profile.probe_interval,
            volume_interval: profile.volume_interval,
            prompt_retry_interval: profile.prompt_retry_interval,
        }
    }
}

impl Default for PollerCadence {
    fn default() -> Self {
        Self::from_profile(&RecoveryProfileEffective::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollLoop {
    Baseline,
    Volume,
    Prompt,
}

impl PollLoop {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Volume => "volume",
            Self::Prompt => "prompt",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    blocking: bool,
    kind: FaultKind,
}

struct PollerState {
    cadence: PollerCadence,
    baseline: Option<RecurringHandle>,
    volume: Option<RecurringHandle>,
    prompt: Option<(Uuid, RecurringHandle)>,
    observations: HashMap<Uuid, Observation>,
}

struct PollerInner {
    orchestrator: RecoveryOrchestrator,
    scheduler: Scheduler,
    state: Mutex<PollerState>,
}

/// Watches faulted torrents and requests recovery when their location comes back.
#[derive(Clone)]
pub struct AmbientPoller {
    inner: Arc<PollerInner>,
}

impl AmbientPoller {
    /// Build a stopped poller.
    #[must_use]
    pub fn new(
        orchestrator: RecoveryOrchestrator,
        scheduler: Scheduler,
        cadence: PollerCadence,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                orchestrator,
                scheduler,
                state: Mutex::new(PollerState {
                    cadence,
                    baseline: None,
                    volume: None,
                    prompt: None,
                    observations: HashMap::new(),
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PollerState> {
        self.inner.lock()
    }

    /// Start the baseline loop, plus the volume loop when the host is local.
    ///
    /// Calling `start` on a running poller has no effect. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self) {
        let local = self
            .inner
            .orchestrator
            .sequencer()
            .host()
            .mode()
            .has_filesystem_access();
        let mut state = self.lock();
        if state.baseline.is_some() {
            return;
        }
        let cadence = state.cadence;
        state.baseline = Some(self.schedule(cadence.probe_interval, PollLoop::Baseline));
        if local {
            state.volume = Some(self.schedule(cadence.volume_interval, PollLoop::Volume));
        }
        info!(
            probe_ms = cadence.probe_interval.as_millis(),
            volume_loop = local,
            "ambient poller started"
        );
    }

    /// Whether the baseline loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().baseline.is_some()
    }

    /// Poll `target` at the prompt cadence while an interactive prompt is open.
    ///
    /// Replaces any prompt loop already running.
    pub fn open_prompt(&self, target: Uuid) {
        let mut state = self.lock();
        if let Some((previous, handle)) = state.prompt.take() {
            handle.cancel();
            debug!(torrent_id = %previous, "prompt loop replaced");
        }
        let handle = self.schedule(state.cadence.prompt_retry_interval, PollLoop::Prompt);
        state.prompt = Some((target, handle));
        debug!(torrent_id = %target, "prompt loop opened");
    }

    /// Stop the prompt loop.
    pub fn close_prompt(&self) {
        if let Some((target, handle)) = self.lock().prompt.take() {
            handle.cancel();
            debug!(torrent_id = %target, "prompt loop closed");
        }
    }

    /// Target of the open prompt, if any.
    #[must_use]
    pub fn prompt_target(&self) -> Option<Uuid> {
        self.lock().prompt.as_ref().map(|(target, _)| *target)
    }

    /// Apply new loop intervals to running loops.
    pub fn update_cadence(&self, cadence: PollerCadence) {
        let mut state = self.lock();
        state.cadence = cadence;
        if let Some(handle) = &state.baseline {
            handle.update_interval(cadence.probe_interval);
        }
        if let Some(handle) = &state.volume {
            handle.update_interval(cadence.volume_interval);
        }
        if let Some((_, handle)) = &state.prompt {
            handle.update_interval(cadence.prompt_retry_interval);
        }
        info!(
            probe_ms = cadence.probe_interval.as_millis(),
            volume_ms = cadence.volume_interval.as_millis(),
            prompt_ms = cadence.prompt_retry_interval.as_millis(),
            "poller cadence updated"
        );
    }

    /// Cancel every loop and forget past observations.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        let handles = [state.baseline.take(), state.volume.take()]
            .into_iter()
            .flatten()
            .chain(state.prompt.take().map(|(_, handle)| handle));
        for handle in handles {
            handle.cancel();
        }
        state.observations.clear();
        info!("ambient poller stopped");
    }

    /// Whether the last observation of `target` was blocking.
    #[must_use]
    pub fn last_blocking(&self, target: Uuid) -> Option<bool> {
        self.lock()
            .observations
            .get(&target)
            .map(|observation| observation.blocking)
    }

    /// Run one pass of the baseline loop.
    ///
    /// # Errors
    ///
    /// Returns an error when the faulted set cannot be listed or a target cannot be assessed.
    pub async fn poll_once(&self) -> anyhow::Result<()> {
        self.run_loop(PollLoop::Baseline).await
    }

    fn schedule(&self, interval: Duration, which: PollLoop) -> RecurringHandle {
        let poller: Weak<PollerInner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.schedule_recurring(interval, move || {
            let poller = poller.clone();
            async move {
                match poller.upgrade() {
                    Some(inner) => AmbientPoller { inner }.run_loop(which).await,
                    None => Ok(()),
                }
            }
        })
    }

    async fn run_loop(&self, which: PollLoop) -> anyhow::Result<()> {
        if let Some(metrics) = self.inner.orchestrator.metrics() {
            metrics.inc_poller_tick(which.as_str());
        }
        let targets = match which {
            PollLoop::Prompt => self.prompt_target().into_iter().collect(),
            PollLoop::Baseline | PollLoop::Volume => {
                let targets = self
                    .inner
                    .orchestrator
                    .sequencer()
                    .engine()
                    .faulted_targets()
                    .await?;
                if which == PollLoop::Baseline {
                    self.forget_cleared(&targets);
                }
                targets
            }
        };
        for target in targets {
            self.observe(target, which).await?;
        }
        Ok(())
    }

    fn forget_cleared(&self, faulted: &[Uuid]) {
        let cleared: Vec<Uuid> = {
            let mut state = self.lock();
            let cleared: Vec<Uuid> = state
                .observations
                .keys()
                .filter(|id| !faulted.contains(id))
                .copied()
                .collect();
            for id in &cleared {
                state.observations.remove(id);
            }
            cleared
        };
        for torrent_id in cleared {
            debug!(torrent_id = %torrent_id, "fault cleared");
            self.inner
                .orchestrator
                .events()
                .publish(Event::FaultCleared { torrent_id });
        }
    }

    async fn observe(&self, target: Uuid, which: PollLoop) -> anyhow::Result<()> {
        let Some(assessment) = self.inner.orchestrator.sequencer().assess(target).await? else {
            if self.lock().observations.remove(&target).is_some() {
                self.inner
                    .orchestrator
                    .events()
                    .publish(Event::FaultCleared { torrent_id: target });
            }
            return Ok(());
        };

        let blocking = assessment.blocking.is_some();
        let kind = assessment.classification.kind;
        let previous = {
            let mut state = self.lock();
            if which == PollLoop::Volume {
                let tracked = kind == FaultKind::VolumeLoss
                    || state
                        .observations
                        .get(&target)
                        .is_some_and(|seen| seen.kind == FaultKind::VolumeLoss);
                if !tracked {
                    return Ok(());
                }
            }
            state
                .observations
                .insert(target, Observation { blocking, kind })
        };

        if previous.is_none_or(|seen| seen.blocking != blocking || seen.kind != kind) {
            self.publish_observation(target, &assessment);
        }
        let was_blocking = previous.is_none_or(|seen| seen.blocking);
        if was_blocking && !blocking {
            self.flip(target, which, &assessment);
        }
        Ok(())
    }

    fn flip(&self, target: Uuid, which: PollLoop, assessment: &Assessment) {
        info!(
            torrent_id = %target,
            fingerprint = %assessment.fingerprint,
            kind = assessment.classification.kind.as_str(),
            poll_loop = which.as_str(),
            "fault no longer blocking; requesting ambient recheck"
        );
        if let Some(metrics) = self.inner.orchestrator.metrics() {
            metrics.inc_poller_flip();
        }
        let orchestrator = self.inner.orchestrator.clone();
        let poller = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            match orchestrator
                .request_recovery(RecoveryRequest::ambient_recheck(target))
                .await
            {
                Some(GateOutcome::Cancelled { reason }) => {
                    debug!(
                        torrent_id = %target,
                        reason = reason.as_str(),
                        "ambient recheck cancelled; retrying on next tick"
                    );
                    if let Some(inner) = poller.upgrade() {
                        inner.mark_blocking(target);
                    }
                }
                Some(outcome) => debug!(
                    torrent_id = %target,
                    outcome = outcome.as_str(),
                    "ambient recheck finished"
                ),
                None => debug!(torrent_id = %target, "fault cleared before ambient recheck"),
            }
        });
    }

    fn publish_observation(&self, target: Uuid, assessment: &Assessment) {
        self.inner
            .orchestrator
            .events()
            .publish(Event::FaultObserved {
                torrent_id: target,
                fingerprint: assessment.fingerprint.to_string(),
                kind: assessment.classification.kind.as_str().to_string(),
                blocking: assessment.blocking.is_some(),
            });
    }
}

impl PollerInner {
    fn lock(&self) -> MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_blocking(&self, target: Uuid) {
        if let Some(observation) = self.lock().observations.get_mut(&target) {
            observation.blocking = true;
        }
    }
}

impl Drop for PollerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let handles = [state.baseline.take(), state.volume.take()]
            .into_iter()
            .flatten()
            .chain(state.prompt.take().map(|(_, handle)| handle));
        let mut cancelled = 0_usize;
        for handle in handles {
            if handle.cancel() {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            warn!(cancelled, "ambient poller dropped with running loops");
        }
    }
}
