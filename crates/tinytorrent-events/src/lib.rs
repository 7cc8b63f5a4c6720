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

//! Recovery event bus for the TinyTorrent daemon.
//!
//! The bus carries typed notifications about fault observation and recovery
//! sessions, assigns sequential identifiers, and replays recent events to
//! subscribers that reconnect with a known identifier. Internally it uses
//! `tokio::broadcast` with a bounded buffer; on overflow the oldest events are
//! dropped. The bus never dispatches actions: recovery is requested through the
//! orchestrator's typed entry point only.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use uuid::Uuid;

/// Identifier assigned to each event emitted by the daemon.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed domain events surfaced by the recovery core.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A faulted torrent was classified by a probe.
    FaultObserved {
        /// Torrent carrying the fault.
        torrent_id: Uuid,
        /// Fault fingerprint.
        fingerprint: String,
        /// Classification kind label (`path_loss`, `volume_loss`, ...).
        kind: String,
        /// Whether the fault still blocks progress.
        blocking: bool,
    },
    /// A recovery session was opened by the gate.
    RecoveryRequested {
        /// Torrent the session targets.
        torrent_id: Uuid,
        /// Fault fingerprint owning the session.
        fingerprint: String,
        /// Requested action label.
        action: String,
        /// Who asked for recovery (`interactive` or `ambient`).
        origin: String,
    },
    /// A request joined an already open session.
    RecoveryCoalesced {
        /// Fault fingerprint of the shared session.
        fingerprint: String,
        /// Origin of the joining request.
        origin: String,
    },
    /// A request was turned away by the gate.
    RecoveryCancelled {
        /// Fingerprint of the rejected request.
        fingerprint: String,
        /// Reason label (`collision`, `abandoned`).
        reason: String,
    },
    /// A recovery session settled and released its fingerprint.
    RecoveryFinished {
        /// Torrent the session targeted.
        torrent_id: Uuid,
        /// Fault fingerprint released.
        fingerprint: String,
        /// Outcome label (`resolved`, `path_needed`, ...).
        outcome: String,
    },
    /// The engine no longer reports a fault for the torrent.
    FaultCleared {
        /// Torrent whose fault cleared.
        torrent_id: Uuid,
    },
    /// Recovery settings were applied.
    SettingsChanged {
        /// Short description of the change.
        description: String,
    },
    /// Health of a recovery component changed.
    HealthChanged {
        /// Components currently degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for stream consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::FaultObserved { .. } => "fault_observed",
            Self::RecoveryRequested { .. } => "recovery_requested",
            Self::RecoveryCoalesced { .. } => "recovery_coalesced",
            Self::RecoveryCancelled { .. } => "recovery_cancelled",
            Self::RecoveryFinished { .. } => "recovery_finished",
            Self::FaultCleared { .. } => "fault_cleared",
            Self::SettingsChanged { .. } => "settings_changed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }

    /// Torrent identifier carried by the event, when there is one.
    #[must_use]
    pub const fn torrent_id(&self) -> Option<Uuid> {
        match self {
            Self::FaultObserved { torrent_id, .. }
            | Self::RecoveryRequested { torrent_id, .. }
            | Self::RecoveryFinished { torrent_id, .. }
            | Self::FaultCleared { torrent_id } => Some(*torrent_id),
            Self::RecoveryCoalesced { .. }
            | Self::RecoveryCancelled { .. }
            | Self::SettingsChanged { .. }
            | Self::HealthChanged { .. } => None,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the in-memory replay
    /// buffer, so dropped events affect both structures consistently. A zero
    /// capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            backlog.extend(buffer.iter().filter(|item| item.id > since).cloned());
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Returns the last assigned identifier, if any events have been published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.back().map(|event| event.id)
    }

    /// Snapshot of the replay buffer, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<EventEnvelope> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.iter().cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn sample_finished(id: u128) -> Event {
        Event::RecoveryFinished {
            torrent_id: Uuid::from_u128(id),
            fingerprint: format!("fp-{id}"),
            outcome: "resolved".to_string(),
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(sample_finished(i));
        }
        assert_eq!(last_id, 5);

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event);
            }
        }

        assert_eq!(received.len(), 3);
        assert_eq!(received.first().map(|e| e.id), Some(3));
        assert_eq!(received.last().map(|e| e.id), Some(5));
    }

    #[tokio::test]
    async fn replay_ring_drops_oldest_events() {
        let bus = EventBus::with_capacity(2);
        for i in 0..4 {
            let _ = bus.publish(sample_finished(i));
        }
        let ids: Vec<_> = bus.recent().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(bus.last_event_id(), Some(4));
    }

    #[tokio::test]
    async fn live_subscribers_receive_new_events() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(None);
        let _ = bus.publish(Event::FaultCleared {
            torrent_id: Uuid::nil(),
        });
        let envelope = timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("event delivered")
            .expect("stream open");
        assert_eq!(envelope.event.kind(), "fault_cleared");
        assert_eq!(envelope.event.torrent_id(), Some(Uuid::nil()));
    }

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let value = serde_json::to_value(Event::RecoveryCancelled {
            fingerprint: "abc".into(),
            reason: "collision".into(),
        })
        .expect("serialize");
        assert_eq!(value["type"], "recovery_cancelled");
        assert_eq!(value["reason"], "collision");
    }
}
