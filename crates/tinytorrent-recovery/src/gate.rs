//! Admission control for recovery sessions.
//!
//! # Design
//! - One session slot system-wide; requests for the open fingerprint share its handle.
//! - Requests for any other fingerprint are cancelled immediately as collisions.
//! - The runner task finalizes through a drop guard, so waiters resolve even if the
//!   runner panics or is aborted.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tinytorrent_recovery_core::{
    CancelReason, Fingerprint, GateOutcome, RecoveryOutcome, RecoverySession,
};
use tinytorrent_telemetry::Metrics;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Cloneable future resolving to the outcome of the open session.
pub type GateHandle = Shared<BoxFuture<'static, GateOutcome>>;

/// Result of asking the gate for a session.
pub enum GateTicket {
    /// A new session was opened for the request.
    Opened(GateHandle),
    /// The request joined the session already open for its fingerprint.
    Joined(GateHandle),
    /// The request resolved without a session.
    Ready(GateOutcome),
}

impl GateTicket {
    /// Wait for the outcome.
    pub async fn resolve(self) -> GateOutcome {
        match self {
            Self::Opened(handle) | Self::Joined(handle) => handle.await,
            Self::Ready(outcome) => outcome,
        }
    }

    /// Stable decision label.
    #[must_use]
    pub const fn decision(&self) -> &'static str {
        match self {
            Self::Opened(_) => "admitted",
            Self::Joined(_) => "coalesced",
            Self::Ready(GateOutcome::Cancelled {
                reason: CancelReason::Collision,
            }) => "collision",
            Self::Ready(_) => "ready",
        }
    }
}

struct ActiveSession {
    id: u64,
    session: RecoverySession,
    handle: GateHandle,
    sender: Option<oneshot::Sender<GateOutcome>>,
}

#[derive(Default)]
struct GateState {
    active: Option<ActiveSession>,
    next_id: u64,
}

struct GateInner {
    state: Mutex<GateState>,
    metrics: Option<Metrics>,
}

/// Single-flight admission control keyed by fault fingerprint.
#[derive(Clone)]
pub struct FingerprintGate {
    inner: Arc<GateInner>,
}

impl Default for FingerprintGate {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintGate {
    /// Create a gate with no open session.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a gate that reports decisions and open sessions to `metrics`.
    #[must_use]
    pub fn with_metrics(metrics: Metrics) -> Self {
        Self::build(Some(metrics))
    }

    fn build(metrics: Option<Metrics>) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState::default()),
                metrics,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit, coalesce, or cancel a request for `session`.
    ///
    /// On admission `run` is spawned onto the runtime and its outcome finalizes the
    /// session. Must be called from within a Tokio runtime.
    pub fn request<F, Fut>(&self, session: RecoverySession, run: F) -> GateTicket
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RecoveryOutcome> + Send + 'static,
    {
        let (ticket, opened) = {
            let mut state = self.lock();
            if let Some(active) = state.active.as_ref() {
                if active.session.fingerprint == session.fingerprint {
                    info!(
                        fingerprint = %session.fingerprint,
                        torrent_id = %session.target,
                        origin = session.origin.as_str(),
                        "recovery request coalesced into open session"
                    );
                    (GateTicket::Joined(active.handle.clone()), None)
                } else {
                    info!(
                        fingerprint = %session.fingerprint,
                        active_fingerprint = %active.session.fingerprint,
                        origin = session.origin.as_str(),
                        "recovery request cancelled by collision"
                    );
                    let cancelled = GateOutcome::Cancelled {
                        reason: CancelReason::Collision,
                    };
                    (GateTicket::Ready(cancelled), None)
                }
            } else {
                let (sender, receiver) = oneshot::channel();
                let handle: GateHandle = receiver
                    .map(|received| {
                        received.unwrap_or(GateOutcome::Cancelled {
                            reason: CancelReason::Abandoned,
                        })
                    })
                    .boxed()
                    .shared();
                let id = state.next_id;
                state.next_id += 1;
                info!(
                    fingerprint = %session.fingerprint,
                    torrent_id = %session.target,
                    action = session.action.as_str(),
                    origin = session.origin.as_str(),
                    "recovery session opened"
                );
                let fingerprint = session.fingerprint.clone();
                state.active = Some(ActiveSession {
                    id,
                    session,
                    handle: handle.clone(),
                    sender: Some(sender),
                });
                (GateTicket::Opened(handle), Some((id, fingerprint)))
            }
        };
        if let Some((id, fingerprint)) = opened {
            self.report_active(1);
            self.spawn_runner(id, fingerprint, run());
        }
        if let Some(metrics) = &self.inner.metrics {
            metrics.inc_gate_decision(ticket.decision());
        }
        ticket
    }

    fn spawn_runner<Fut>(&self, id: u64, fingerprint: Fingerprint, run: Fut)
    where
        Fut: Future<Output = RecoveryOutcome> + Send + 'static,
    {
        let release = SessionRelease {
            gate: self.clone(),
            id,
            fingerprint,
            armed: true,
        };
        tokio::spawn(async move {
            let mut release = release;
            let outcome = run.await;
            release.armed = false;
            release
                .gate
                .finalize_session(id, &release.fingerprint, GateOutcome::from(outcome));
        });
    }

    /// Close the session for `fingerprint` and resolve every waiter with `outcome`.
    ///
    /// Returns `false` when no session is open for `fingerprint`, including when it was
    /// already finalized.
    pub fn finalize(&self, fingerprint: &Fingerprint, outcome: GateOutcome) -> bool {
        let id = {
            let state = self.lock();
            match &state.active {
                Some(active) if &active.session.fingerprint == fingerprint => active.id,
                _ => return false,
            }
        };
        self.finalize_session(id, fingerprint, outcome)
    }

    fn finalize_session(&self, id: u64, fingerprint: &Fingerprint, outcome: GateOutcome) -> bool {
        let sender = {
            let mut state = self.lock();
            match state.active.take() {
                Some(mut active) if active.id == id => active.sender.take(),
                other => {
                    state.active = other;
                    None
                }
            }
        };
        let Some(sender) = sender else {
            debug!(fingerprint = %fingerprint, "session already finalized");
            return false;
        };
        self.report_active(0);
        info!(
            fingerprint = %fingerprint,
            outcome = outcome.as_str(),
            "recovery session finalized"
        );
        let _ = sender.send(outcome);
        true
    }

    /// Snapshot of the open session, if any.
    #[must_use]
    pub fn active_session(&self) -> Option<RecoverySession> {
        self.lock()
            .active
            .as_ref()
            .map(|active| active.session.clone())
    }

    /// Whether a session is open for `fingerprint`.
    #[must_use]
    pub fn is_open(&self, fingerprint: &Fingerprint) -> bool {
        self.lock()
            .active
            .as_ref()
            .is_some_and(|active| &active.session.fingerprint == fingerprint)
    }

    fn report_active(&self, count: i64) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.set_active_sessions(count);
        }
    }
}

/// Finalizes an abandoned session when the runner exits without an outcome.
struct SessionRelease {
    gate: FingerprintGate,
    id: u64,
    fingerprint: Fingerprint,
    armed: bool,
}

impl Drop for SessionRelease {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                fingerprint = %self.fingerprint,
                "recovery runner exited without an outcome"
            );
            self.gate.finalize_session(
                self.id,
                &self.fingerprint,
                GateOutcome::Cancelled {
                    reason: CancelReason::Abandoned,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tinytorrent_recovery_core::{
        Confidence, FaultClassification, FaultKind, PathReason, RecoveryAction, RequestOrigin,
    };
    use uuid::Uuid;

    fn session(fingerprint: &str) -> RecoverySession {
        RecoverySession {
            fingerprint: Fingerprint::new(fingerprint),
            target: Uuid::from_u128(1),
            action: RecoveryAction::Recheck,
            classification: FaultClassification {
                kind: FaultKind::PathLoss,
                affected_path: "/data".into(),
                volume_root: None,
                reason: Some(PathReason::Missing),
                confidence: Confidence::Certain,
            },
            origin: RequestOrigin::Interactive,
            created_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_fingerprint_coalesces_onto_one_run() {
        let gate = FingerprintGate::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let make_run = |runs: Arc<AtomicUsize>| {
            move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                RecoveryOutcome::Resolved
            }
        };
        let first = gate.request(session("fp"), make_run(Arc::clone(&runs)));
        let second = gate.request(session("fp"), make_run(Arc::clone(&runs)));
        assert_eq!(first.decision(), "admitted");
        assert_eq!(second.decision(), "coalesced");

        let (a, b) = tokio::join!(first.resolve(), second.resolve());
        assert_eq!(a, b);
        assert!(matches!(a, GateOutcome::Handled { .. }));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(gate.active_session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn different_fingerprint_collides_immediately() {
        let gate = FingerprintGate::new();
        let open = gate.request(session("fp-a"), || async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            RecoveryOutcome::Noop
        });
        let rejected = gate.request(session("fp-b"), || async { RecoveryOutcome::Resolved });
        assert_eq!(
            rejected.resolve().await,
            GateOutcome::Cancelled {
                reason: CancelReason::Collision
            }
        );
        assert!(gate.is_open(&Fingerprint::new("fp-a")));
        assert!(matches!(open.resolve().await, GateOutcome::Continue { .. }));
        assert!(!gate.is_open(&Fingerprint::new("fp-a")));
    }

    #[tokio::test]
    async fn panicking_runner_resolves_waiters_as_abandoned() {
        let gate = FingerprintGate::new();
        let ticket = gate.request(session("fp"), || async {
            let fail = true;
            assert!(!fail, "sequencer bug");
            RecoveryOutcome::Noop
        });
        assert_eq!(
            ticket.resolve().await,
            GateOutcome::Cancelled {
                reason: CancelReason::Abandoned
            }
        );
        assert!(gate.active_session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_resolves_exactly_once() {
        let metrics = Metrics::new().expect("metrics");
        let gate = FingerprintGate::with_metrics(metrics.clone());
        let fingerprint = Fingerprint::new("fp");
        let ticket = gate.request(session("fp"), || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            RecoveryOutcome::Resolved
        });
        assert_eq!(metrics.snapshot().active_sessions, 1);

        let outcome = GateOutcome::Continue {
            outcome: RecoveryOutcome::PathNeeded {
                reason: PathReason::DiskFull,
            },
        };
        assert!(gate.finalize(&fingerprint, outcome.clone()));
        assert!(!gate.finalize(&fingerprint, GateOutcome::Cancelled {
            reason: CancelReason::Abandoned
        }));
        assert_eq!(ticket.resolve().await, outcome);
        assert_eq!(metrics.snapshot().active_sessions, 0);
        assert_eq!(metrics.gate_decision_count("admitted"), 1);
    }
}
