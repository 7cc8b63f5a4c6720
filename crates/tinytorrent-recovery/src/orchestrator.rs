//! Typed entry point for recovery requests.
//!
//! # Design
//! - Every caller, interactive or ambient, goes through [`RecoveryOrchestrator::request_recovery`].
//! - Relocation bypasses the gate; a bare recheck of a data-level fault never opens a session.
//!   Verification of a data-level fault is therefore reached through `redownload` here.
//! - The event bus only carries notifications about what happened here.

use tinytorrent_events::{Event, EventBus};
use tinytorrent_recovery_core::{
    CancelReason, FaultKind, GateOutcome, RecoveryAction, RecoveryOptions, RecoveryOutcome,
    RecoveryRequest, RecoverySession,
};
use tinytorrent_telemetry::Metrics;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::gate::{FingerprintGate, GateTicket};
use crate::sequencer::{Assessment, RecoverySequencer};

/// Routes recovery requests through classification, the gate, and the sequencer.
#[derive(Clone)]
pub struct RecoveryOrchestrator {
    sequencer: RecoverySequencer,
    gate: FingerprintGate,
    events: EventBus,
    metrics: Option<Metrics>,
}

impl RecoveryOrchestrator {
    /// Orchestrator without metrics.
    #[must_use]
    pub fn new(sequencer: RecoverySequencer, events: EventBus) -> Self {
        Self {
            sequencer,
            gate: FingerprintGate::new(),
            events,
            metrics: None,
        }
    }

    /// Orchestrator reporting sessions, outcomes, and gate decisions to `metrics`.
    #[must_use]
    pub fn with_metrics(sequencer: RecoverySequencer, events: EventBus, metrics: Metrics) -> Self {
        Self {
            sequencer,
            gate: FingerprintGate::with_metrics(metrics.clone()),
            events,
            metrics: Some(metrics),
        }
    }

    /// Sequencer used for attempts and assessments.
    #[must_use]
    pub const fn sequencer(&self) -> &RecoverySequencer {
        &self.sequencer
    }

    /// Gate owning the active session slot.
    #[must_use]
    pub const fn gate(&self) -> &FingerprintGate {
        &self.gate
    }

    /// Event bus notifications are published on.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Metrics handle, when configured.
    #[must_use]
    pub const fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    /// Handle a recovery request.
    ///
    /// Returns `None` when `target` carries no fault descriptor.
    pub async fn request_recovery(&self, request: RecoveryRequest) -> Option<GateOutcome> {
        let target = request.target;
        let assessment = match self.sequencer.assess(target).await {
            Ok(Some(assessment)) => assessment,
            Ok(None) => {
                debug!(torrent_id = %target, "recovery requested for healthy torrent");
                return None;
            }
            Err(err) => {
                warn!(torrent_id = %target, error = %err.detail(), "fault lookup failed");
                return Some(GateOutcome::Continue {
                    outcome: RecoveryOutcome::Error {
                        detail: err.detail(),
                    },
                });
            }
        };
        self.publish_observation(target, &assessment);

        if matches!(request.action, RecoveryAction::SetLocation { .. }) {
            let outcome = self
                .sequencer
                .execute(target, &request.action, request.options)
                .await;
            self.record_outcome(&outcome);
            return Some(GateOutcome::from(outcome));
        }

        if request.action == RecoveryAction::Recheck
            && request.options == RecoveryOptions::default()
            && assessment.classification.kind == FaultKind::DataGap
        {
            debug!(
                torrent_id = %target,
                fingerprint = %assessment.fingerprint,
                "data-level fault needs no session"
            );
            return Some(GateOutcome::Continue {
                outcome: RecoveryOutcome::Noop,
            });
        }

        Some(self.gated(request, assessment).await)
    }

    /// Probe and classify `target` without mutating anything.
    pub async fn probe_only(&self, target: Uuid) -> RecoveryOutcome {
        self.sequencer.probe_only(target).await
    }

    async fn gated(&self, request: RecoveryRequest, assessment: Assessment) -> GateOutcome {
        let RecoveryRequest {
            target,
            action,
            options,
            origin,
        } = request;
        let fingerprint = assessment.fingerprint.clone();
        let session = RecoverySession {
            fingerprint: fingerprint.clone(),
            target,
            action: action.clone(),
            classification: assessment.classification,
            origin,
            created_at: chrono::Utc::now(),
        };

        let sequencer = self.sequencer.clone();
        let run_action = action.clone();
        let ticket = self.gate.request(session, move || async move {
            sequencer.execute(target, &run_action, options).await
        });

        let opened = matches!(ticket, GateTicket::Opened(_));
        match &ticket {
            GateTicket::Opened(_) => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_session(action.as_str(), origin.as_str());
                }
                self.events.publish(Event::RecoveryRequested {
                    torrent_id: target,
                    fingerprint: fingerprint.to_string(),
                    action: action.as_str().to_string(),
                    origin: origin.as_str().to_string(),
                });
            }
            GateTicket::Joined(_) => {
                self.events.publish(Event::RecoveryCoalesced {
                    fingerprint: fingerprint.to_string(),
                    origin: origin.as_str().to_string(),
                });
            }
            GateTicket::Ready(GateOutcome::Cancelled { reason }) => {
                self.publish_cancelled(&fingerprint.to_string(), *reason);
            }
            GateTicket::Ready(_) => {}
        }

        let outcome = ticket.resolve().await;
        if opened {
            match &outcome {
                GateOutcome::Continue { outcome: attempt } | GateOutcome::Handled { outcome: attempt } => {
                    self.record_outcome(attempt);
                    self.events.publish(Event::RecoveryFinished {
                        torrent_id: target,
                        fingerprint: fingerprint.to_string(),
                        outcome: attempt.as_str().to_string(),
                    });
                }
                GateOutcome::Cancelled { reason } => {
                    self.publish_cancelled(&fingerprint.to_string(), *reason);
                }
            }
        }
        outcome
    }

    fn publish_observation(&self, target: Uuid, assessment: &Assessment) {
        self.events.publish(Event::FaultObserved {
            torrent_id: target,
            fingerprint: assessment.fingerprint.to_string(),
            kind: assessment.classification.kind.as_str().to_string(),
            blocking: assessment.blocking.is_some(),
        });
    }

    fn publish_cancelled(&self, fingerprint: &str, reason: CancelReason) {
        self.events.publish(Event::RecoveryCancelled {
            fingerprint: fingerprint.to_string(),
            reason: reason.as_str().to_string(),
        });
    }

    fn record_outcome(&self, outcome: &RecoveryOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_outcome(outcome.as_str());
        }
    }
}
