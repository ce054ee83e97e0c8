use serde::{Deserialize, Serialize};

/// The ways an evaluation can fail. Every kind means "condition unknown":
/// the scheduler leaves the lifecycle state untouched and only counts the
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalErrorKind {
    /// The store was unreachable or answered 5xx after the client's
    /// internal retries.
    QueryFailed,
    /// The store rejected the query as malformed (4xx). Indicates a rule
    /// bug rather than an outage, so it is always recorded durably.
    QueryRejected,
    /// The target index does not exist.
    IndexMissing,
    /// The aggregation response did not contain the projected scalar.
    ValueExtract,
    /// The store call exceeded its deadline.
    Timeout,
}

impl EvalErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QueryFailed => "query_failed",
            Self::QueryRejected => "query_rejected",
            Self::IndexMissing => "index_missing",
            Self::ValueExtract => "value_extract",
            Self::Timeout => "timeout",
        }
    }

    /// Whether this kind points at the rule itself rather than the store.
    /// Rule bugs always get a durable history event.
    pub fn is_rule_bug(self) -> bool {
        matches!(self, Self::QueryRejected)
    }
}

/// Result of one evaluation, consumed by the scheduler. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    /// The observed scalar, when the query succeeded.
    pub value: Option<f64>,
    /// Whether `value OP threshold` held. Always false on error.
    pub condition_met: bool,
    /// Why the evaluation failed, if it did.
    pub error: Option<EvalErrorKind>,
    /// Short excerpt of the raw response or error message, for operators.
    pub detail: Option<String>,
}

impl EvaluationResult {
    /// A successful evaluation.
    pub fn ok(value: f64, condition_met: bool) -> Self {
        Self {
            value: Some(value),
            condition_met,
            error: None,
            detail: None,
        }
    }

    /// A failed evaluation; the condition is unknown.
    pub fn failed(kind: EvalErrorKind, detail: impl Into<String>) -> Self {
        Self {
            value: None,
            condition_met: false,
            error: Some(kind),
            detail: Some(detail.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
