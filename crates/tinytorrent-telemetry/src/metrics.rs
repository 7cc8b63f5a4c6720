//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges the recovery gate, poller, and scheduler report.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across the recovery core.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    sessions_total: IntCounterVec,
    outcomes_total: IntCounterVec,
    gate_decisions_total: IntCounterVec,
    active_sessions: IntGauge,
    poller_ticks_total: IntCounterVec,
    poller_flips_total: IntCounter,
    scheduler_callback_failures_total: IntCounter,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Recovery sessions currently open.
    pub active_sessions: i64,
    /// Blocking to non-blocking flips detected by the poller.
    pub poller_flips_total: u64,
    /// Scheduler callbacks that failed or panicked.
    pub scheduler_callback_failures_total: u64,
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn counter(name: &'static str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

impl Metrics {
    /// Construct a new metrics registry with the recovery collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let sessions_total = counter_vec(
            "recovery_sessions_total",
            "Recovery sessions opened by action and origin",
            &["action", "origin"],
        )?;
        let outcomes_total = counter_vec(
            "recovery_outcomes_total",
            "Recovery attempts finished by outcome",
            &["outcome"],
        )?;
        let gate_decisions_total = counter_vec(
            "recovery_gate_decisions_total",
            "Gate admission decisions",
            &["decision"],
        )?;
        let active_sessions = IntGauge::with_opts(Opts::new(
            "recovery_active_sessions",
            "Recovery sessions currently open",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "recovery_active_sessions",
            source,
        })?;
        let poller_ticks_total = counter_vec(
            "recovery_poller_ticks_total",
            "Ambient poller loop iterations",
            &["loop"],
        )?;
        let poller_flips_total = counter(
            "recovery_poller_flips_total",
            "Faults observed flipping from blocking to non-blocking",
        )?;
        let scheduler_callback_failures_total = counter(
            "scheduler_callback_failures_total",
            "Scheduled callbacks that returned an error or panicked",
        )?;

        register(&registry, "recovery_sessions_total", &sessions_total)?;
        register(&registry, "recovery_outcomes_total", &outcomes_total)?;
        register(
            &registry,
            "recovery_gate_decisions_total",
            &gate_decisions_total,
        )?;
        register(&registry, "recovery_active_sessions", &active_sessions)?;
        register(&registry, "recovery_poller_ticks_total", &poller_ticks_total)?;
        register(&registry, "recovery_poller_flips_total", &poller_flips_total)?;
        register(
            &registry,
            "scheduler_callback_failures_total",
            &scheduler_callback_failures_total,
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                sessions_total,
                outcomes_total,
                gate_decisions_total,
                active_sessions,
                poller_ticks_total,
                poller_flips_total,
                scheduler_callback_failures_total,
            }),
        })
    }

    /// Record a newly opened recovery session.
    pub fn inc_session(&self, action: &str, origin: &str) {
        self.inner
            .sessions_total
            .with_label_values(&[action, origin])
            .inc();
    }

    /// Record a finished recovery attempt.
    pub fn inc_outcome(&self, outcome: &str) {
        self.inner
            .outcomes_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record a gate decision (`admitted`, `coalesced`, `collision`, `bypass`, `short_circuit`).
    pub fn inc_gate_decision(&self, decision: &str) {
        self.inner
            .gate_decisions_total
            .with_label_values(&[decision])
            .inc();
    }

    /// Set the open-session gauge.
    pub fn set_active_sessions(&self, count: i64) {
        self.inner.active_sessions.set(count);
    }

    /// Record one iteration of a poller loop.
    pub fn inc_poller_tick(&self, loop_name: &str) {
        self.inner
            .poller_ticks_total
            .with_label_values(&[loop_name])
            .inc();
    }

    /// Record a blocking to non-blocking flip.
    pub fn inc_poller_flip(&self) {
        self.inner.poller_flips_total.inc();
    }

    /// Record a failed or panicked scheduler callback.
    pub fn inc_scheduler_callback_failure(&self) {
        self.inner.scheduler_callback_failures_total.inc();
    }

    /// Current count for an outcome label.
    #[must_use]
    pub fn outcome_count(&self, outcome: &str) -> u64 {
        self.inner
            .outcomes_total
            .with_label_values(&[outcome])
            .get()
    }

    /// Current count for a gate decision label.
    #[must_use]
    pub fn gate_decision_count(&self, decision: &str) -> u64 {
        self.inner
            .gate_decisions_total
            .with_label_values(&[decision])
            .get()
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_sessions: self.inner.active_sessions.get(),
            poller_flips_total: self.inner.poller_flips_total.get(),
            scheduler_callback_failures_total: self
                .inner
                .scheduler_callback_failures_total
                .get(),
        }
    }
}
