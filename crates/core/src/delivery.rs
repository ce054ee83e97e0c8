use serde::{Deserialize, Serialize};

/// Final status of a single action delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Delivered,
    PermanentlyFailed,
}

/// Aggregate status across all of an alert's actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    AllOk,
    Partial,
    AllFailed,
}

/// Outcome of delivering one action, retries included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Destination URL of the action.
    pub url: String,
    /// Whether the action ultimately got through.
    pub status: ActionStatus,
    /// HTTP status of the final attempt, when a response was received.
    #[serde(default)]
    pub http_status: Option<u16>,
    /// Number of attempts made (1 = delivered first try).
    pub attempts: u32,
    /// Total wall-clock time spent on this action, retries included.
    pub elapsed_ms: u64,
}

/// Per-alert delivery report: ordered per-action outcomes plus the
/// aggregate status, recorded on the history event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub status: AggregateStatus,
    pub outcomes: Vec<ActionOutcome>,
}

impl DeliveryReport {
    /// Build a report from per-action outcomes, computing the aggregate.
    pub fn from_outcomes(outcomes: Vec<ActionOutcome>) -> Self {
        let delivered = outcomes
            .iter()
            .filter(|o| o.status == ActionStatus::Delivered)
            .count();
        let status = if delivered == outcomes.len() && !outcomes.is_empty() {
            AggregateStatus::AllOk
        } else if delivered > 0 {
            AggregateStatus::Partial
        } else {
            AggregateStatus::AllFailed
        };
        Self { status, outcomes }
    }

    /// True when at least one action was delivered. A partial delivery
    /// still counts as "notification sent" for throttle purposes.
    pub fn any_delivered(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.status == ActionStatus::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: ActionStatus, attempts: u32) -> ActionOutcome {
        ActionOutcome {
            url: "https://example.com/hook".into(),
            status,
            http_status: Some(200),
            attempts,
            elapsed_ms: 12,
        }
    }

    #[test]
    fn aggregate_all_ok() {
        let report = DeliveryReport::from_outcomes(vec![
            outcome(ActionStatus::Delivered, 1),
            outcome(ActionStatus::Delivered, 2),
        ]);
        assert_eq!(report.status, AggregateStatus::AllOk);
        assert!(report.any_delivered());
    }

    #[test]
    fn aggregate_partial() {
        let report = DeliveryReport::from_outcomes(vec![
            outcome(ActionStatus::Delivered, 1),
            outcome(ActionStatus::PermanentlyFailed, 5),
        ]);
        assert_eq!(report.status, AggregateStatus::Partial);
        assert!(report.any_delivered());
    }

    #[test]
    fn aggregate_all_failed() {
        let report =
            DeliveryReport::from_outcomes(vec![outcome(ActionStatus::PermanentlyFailed, 5)]);
        assert_eq!(report.status, AggregateStatus::AllFailed);
        assert!(!report.any_delivered());
    }

    #[test]
    fn empty_outcomes_is_all_failed() {
        let report = DeliveryReport::from_outcomes(vec![]);
        assert_eq!(report.status, AggregateStatus::AllFailed);
    }
}
