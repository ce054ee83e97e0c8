use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking engine activity. Relaxed ordering throughout;
/// call [`snapshot`](Self::snapshot) for a point-in-time view.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Evaluations completed, successful or not.
    pub evaluations: AtomicU64,
    /// Evaluations that produced a verdict error.
    pub evaluation_errors: AtomicU64,
    /// Ticks dropped because the previous evaluation was still running.
    pub overruns: AtomicU64,
    /// Lifecycle state changes.
    pub transitions: AtomicU64,
    /// Dispatches where at least one action was delivered.
    pub notifications_sent: AtomicU64,
    /// Dispatches where every action failed.
    pub notifications_failed: AtomicU64,
    /// History events appended.
    pub events_appended: AtomicU64,
    /// State or history writes that failed.
    pub persistence_failures: AtomicU64,
}

/// A point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub evaluations: u64,
    pub evaluation_errors: u64,
    pub overruns: u64,
    pub transitions: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub events_appended: u64,
    pub persistence_failures: u64,
}

impl EngineMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            evaluation_errors: self.evaluation_errors.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            events_appended: self.events_appended.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = EngineMetrics::default();
        EngineMetrics::incr(&metrics.evaluations);
        EngineMetrics::incr(&metrics.evaluations);
        EngineMetrics::incr(&metrics.overruns);

        let snap = metrics.snapshot();
        assert_eq!(snap.evaluations, 2);
        assert_eq!(snap.overruns, 1);
        assert_eq!(snap.transitions, 0);
    }
}
