use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a rule.
///
/// `Resolved` is transient: it is entered on the evaluation that first
/// observes the condition clearing while the rule was firing, and
/// collapses to `Ok` on the next evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertState {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FIRING")]
    Firing,
    #[serde(rename = "RESOLVED")]
    Resolved,
}

impl AlertState {
    /// Lower-case spelling used in template contexts.
    pub fn as_lower(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

impl Default for AlertState {
    fn default() -> Self {
        Self::Ok
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::Firing => "FIRING",
            Self::Resolved => "RESOLVED",
        };
        f.write_str(s)
    }
}

/// Mutable per-rule runtime state, persisted to the state index after
/// every evaluation that changes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleState {
    /// Current lifecycle state.
    pub state: AlertState,
    /// When the rule was last evaluated, successfully or not.
    #[serde(default)]
    pub last_eval_at: Option<DateTime<Utc>>,
    /// Scalar from the last successful evaluation.
    #[serde(default)]
    pub last_value: Option<f64>,
    /// When the condition first became true during the current firing
    /// streak. `Some` iff the state is `Firing`.
    #[serde(default)]
    pub condition_met_since: Option<DateTime<Utc>>,
    /// Last time a firing notification was actually sent.
    #[serde(default)]
    pub last_notified_at: Option<DateTime<Utc>>,
    /// Consecutive evaluation errors; reset on any successful evaluation.
    #[serde(default)]
    pub consecutive_errors: u32,
    /// Most recent evaluation error, surfaced via the management API.
    #[serde(default)]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_ok() {
        let state = RuleState::default();
        assert_eq!(state.state, AlertState::Ok);
        assert!(state.last_eval_at.is_none());
        assert!(state.condition_met_since.is_none());
        assert_eq!(state.consecutive_errors, 0);
    }

    #[test]
    fn serde_uses_uppercase_states() {
        assert_eq!(
            serde_json::to_string(&AlertState::Firing).unwrap(),
            "\"FIRING\""
        );
        let back: AlertState = serde_json::from_str("\"RESOLVED\"").unwrap();
        assert_eq!(back, AlertState::Resolved);
    }

    #[test]
    fn persist_then_load_is_fixed_point() {
        let state = RuleState {
            state: AlertState::Firing,
            last_eval_at: Some(Utc::now()),
            last_value: Some(150.0),
            condition_met_since: Some(Utc::now()),
            last_notified_at: Some(Utc::now()),
            consecutive_errors: 0,
            last_error: None,
        };
        let doc = serde_json::to_value(&state).unwrap();
        let back: RuleState = serde_json::from_value(doc).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn missing_optional_fields_default() {
        let back: RuleState = serde_json::from_str(r#"{"state":"OK"}"#).unwrap();
        assert_eq!(back, RuleState::default());
    }
}
