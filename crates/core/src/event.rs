use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delivery::DeliveryReport;
use crate::rule::CompareOp;
use crate::state::AlertState;

/// What a history event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A lifecycle transition.
    Transition,
    /// An evaluation error crossing a logged threshold, or a rejected
    /// query.
    EvaluationError,
}

/// An immutable record appended to the history index. Never updated or
/// deleted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Time-sorted unique id (UUID v7).
    pub id: Uuid,
    pub rule_name: String,
    pub kind: EventKind,
    pub prior_state: AlertState,
    pub new_state: AlertState,
    pub timestamp: DateTime<Utc>,
    /// Observed scalar, absent for evaluation errors.
    #[serde(default)]
    pub observed_value: Option<f64>,
    pub threshold: f64,
    pub operator: CompareOp,
    /// Error detail, present for `evaluation_error` events.
    #[serde(default)]
    pub error: Option<String>,
    /// Per-action delivery breakdown, when notifications were dispatched.
    #[serde(default)]
    pub delivery: Option<DeliveryReport>,
}

impl AlertEvent {
    /// Record a lifecycle transition observed at `timestamp`.
    pub fn transition(
        rule_name: impl Into<String>,
        prior_state: AlertState,
        new_state: AlertState,
        timestamp: DateTime<Utc>,
        observed_value: Option<f64>,
        threshold: f64,
        operator: CompareOp,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            rule_name: rule_name.into(),
            kind: EventKind::Transition,
            prior_state,
            new_state,
            timestamp,
            observed_value,
            threshold,
            operator,
            error: None,
            delivery: None,
        }
    }

    /// Record a notable evaluation error. Lifecycle state is unchanged, so
    /// prior and new state coincide.
    pub fn evaluation_error(
        rule_name: impl Into<String>,
        state: AlertState,
        timestamp: DateTime<Utc>,
        threshold: f64,
        operator: CompareOp,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            rule_name: rule_name.into(),
            kind: EventKind::EvaluationError,
            prior_state: state,
            new_state: state,
            timestamp,
            observed_value: None,
            threshold,
            operator,
            error: Some(error.into()),
            delivery: None,
        }
    }

    /// Attach the delivery breakdown after dispatch completed.
    #[must_use]
    pub fn with_delivery(mut self, report: DeliveryReport) -> Self {
        self.delivery = Some(report);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_time_sorted() {
        let a = AlertEvent::transition(
            "r",
            AlertState::Ok,
            AlertState::Firing,
            Utc::now(),
            Some(150.0),
            100.0,
            CompareOp::Gt,
        );
        // Land in a later millisecond so the v7 timestamp prefix differs.
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = AlertEvent::transition(
            "r",
            AlertState::Firing,
            AlertState::Resolved,
            Utc::now(),
            Some(50.0),
            100.0,
            CompareOp::Gt,
        );
        assert!(a.id < b.id, "v7 ids must sort by creation time");
    }

    #[test]
    fn error_event_keeps_state() {
        let ev = AlertEvent::evaluation_error(
            "r",
            AlertState::Firing,
            Utc::now(),
            100.0,
            CompareOp::Gt,
            "store unavailable",
        );
        assert_eq!(ev.kind, EventKind::EvaluationError);
        assert_eq!(ev.prior_state, ev.new_state);
        assert!(ev.observed_value.is_none());
        assert_eq!(ev.error.as_deref(), Some("store unavailable"));
    }

    #[test]
    fn serde_roundtrip() {
        let ev = AlertEvent::transition(
            "high-error-rate",
            AlertState::Ok,
            AlertState::Firing,
            Utc::now(),
            Some(150.0),
            100.0,
            CompareOp::Gt,
        );
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "transition");
        assert_eq!(json["prior_state"], "OK");
        assert_eq!(json["new_state"], "FIRING");
        let back: AlertEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, ev);
    }
}
