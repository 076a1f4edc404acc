//! Concurrency gate.
//!
//! A single async mutex per disk. Batch operations that must see a stable
//! tree (find/replace across files, externally triggered full walks) hold
//! it for their whole duration. Single-item mutations do not take it.
//!
//! The gate is not re-entrant: code running under a [`GateGuard`] must not
//! call anything that acquires the gate again.

use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};

/// Mutual exclusion for gated batch operations.
#[derive(Debug, Default)]
pub struct Gate {
    lock: Mutex<()>,
}

/// Held for the duration of a gated operation.
#[derive(Debug)]
pub struct GateGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    label: &'static str,
    acquired_at: Instant,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the gate. `label` names the holder in logs.
    pub async fn acquire(&self, label: &'static str) -> GateGuard<'_> {
        let waited = Instant::now();
        let guard = self.lock.lock().await;
        tracing::trace!(label, waited_ms = waited.elapsed().as_millis() as u64, "gate acquired");
        GateGuard {
            _guard: guard,
            label,
            acquired_at: Instant::now(),
        }
    }

    /// Take the gate only if it is free.
    pub fn try_acquire(&self, label: &'static str) -> Option<GateGuard<'_>> {
        self.lock.try_lock().ok().map(|guard| GateGuard {
            _guard: guard,
            label,
            acquired_at: Instant::now(),
        })
    }

    pub fn is_held(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

impl GateGuard<'_> {
    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        tracing::trace!(
            label = self.label,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "gate released"
        );
    }
}
