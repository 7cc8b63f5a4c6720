//! Per-key single-flight execution for mutating recovery steps.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

/// Suppresses overlapping operations that share a key.
///
/// A key is present exactly while an operation for it is running; it is released on every
/// exit path, including when the running future is dropped.
#[derive(Clone, Default)]
pub struct IdempotencyGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

struct KeyRelease {
    in_flight: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for KeyRelease {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl IdempotencyGuard {
    /// Create an empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` unless another operation for `key` is in flight.
    ///
    /// Returns `None` without invoking `operation` when the key is busy.
    pub async fn run<F, Fut, T>(&self, key: &str, operation: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let release = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if !in_flight.insert(key.to_string()) {
                debug!(key, "duplicate operation suppressed");
                return None;
            }
            KeyRelease {
                in_flight: Arc::clone(&self.in_flight),
                key: key.to_string(),
            }
        };
        let output = operation().await;
        drop(release);
        Some(output)
    }

    /// Whether an operation for `key` is running.
    #[must_use]
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}
