use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration;

/// Comparison operator applied between the observed scalar and the rule's
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl CompareOp {
    /// Returns the operator in its wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Eq => "eq",
        }
    }

    /// Apply the comparison: `value OP threshold`.
    pub fn compare(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Gte => value >= threshold,
            Self::Lt => value < threshold,
            Self::Lte => value <= threshold,
            Self::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

/// The closed set of aggregations that reduce matched documents to a
/// single scalar. Plain hit counting is expressed by omitting the
/// aggregation entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggKind {
    Sum,
    Avg,
    Min,
    Max,
    Percentile,
    Cardinality,
}

impl AggKind {
    /// The store's name for this aggregation type.
    pub fn store_name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Percentile => "percentiles",
            Self::Cardinality => "cardinality",
        }
    }
}

/// An aggregation specification from a rule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Which reduction to apply.
    #[serde(rename = "type")]
    pub kind: AggKind,
    /// Document field the reduction runs over.
    pub field: String,
    /// Percentile to extract, required when `kind` is `percentile`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
}

impl Aggregation {
    /// Build the `aggs` body sent to the store. The aggregation is always
    /// emitted under the fixed name `metric` so the projection path has a
    /// stable root.
    pub fn to_store_body(&self) -> serde_json::Value {
        let mut inner = serde_json::json!({ "field": self.field });
        if self.kind == AggKind::Percentile {
            let pct = self.percent.unwrap_or(99.0);
            inner["percents"] = serde_json::json!([pct]);
        }
        let agg_name = self.kind.store_name();
        serde_json::json!({ "metric": { agg_name: inner } })
    }

    /// Default projection path selecting the scalar out of the store's
    /// aggregation response.
    pub fn default_projection(&self) -> String {
        match self.kind {
            AggKind::Percentile => {
                let pct = self.percent.unwrap_or(99.0);
                format!("metric.values.{pct:.1}")
            }
            _ => "metric.value".to_owned(),
        }
    }
}

/// The query portion of a rule: which indices to search, over which time
/// window, and how to reduce the matches to a scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Target index patterns, in order. Never empty.
    pub indices: Vec<String>,
    /// Field holding the event timestamp.
    pub time_field: String,
    /// Width of the relative window (`now-<window>` .. `now`).
    #[serde(with = "duration::serde_str")]
    pub window: Duration,
    /// Optional filter in the store's query syntax, embedded verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<serde_json::Value>,
    /// Optional aggregation; absent means the scalar is the hit count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,
    /// Projection path override for extracting the scalar from the
    /// aggregation response. Defaults per aggregation kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<String>,
}

impl QuerySpec {
    /// The effective projection path, honoring the per-rule override.
    pub fn projection_path(&self) -> Option<String> {
        let agg = self.aggregation.as_ref()?;
        Some(
            self.projection
                .clone()
                .unwrap_or_else(|| agg.default_projection()),
        )
    }
}

/// The firing condition: a threshold and a comparison operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub operator: CompareOp,
    pub threshold: f64,
}

impl Condition {
    /// Whether the observed value meets the condition.
    pub fn is_met(&self, value: f64) -> bool {
        self.operator.compare(value, self.threshold)
    }
}

/// The closed set of notification action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Webhook,
}

/// HTTP method for a webhook action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Returns the method name as an uppercase string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl Default for HttpMethod {
    fn default() -> Self {
        Self::Post
    }
}

/// A single notification action on a rule.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Action kind; currently only `webhook`.
    #[serde(default = "default_action_kind")]
    pub kind: ActionKind,
    /// Destination URL.
    pub url: String,
    /// HTTP method, `POST` by default.
    #[serde(default)]
    pub method: HttpMethod,
    /// Static headers included in every request. Values may carry
    /// credentials and are redacted from `Debug` output.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// JSON body template; string leaves may contain `{{alert.*}}`
    /// placeholders.
    pub body: serde_json::Value,
    /// Per-action delivery timeout override.
    #[serde(default, with = "duration::serde_opt_str", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

fn default_action_kind() -> ActionKind {
    ActionKind::Webhook
}

impl std::fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let headers: HashMap<&str, &str> = self
            .headers
            .keys()
            .map(|k| (k.as_str(), "[REDACTED]"))
            .collect();
        f.debug_struct("ActionSpec")
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &headers)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A fully validated alert rule. Immutable once loaded; reload produces a
/// fresh value rather than mutating in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique name, stable across reloads. Serves as the state key.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Disabled rules are loaded but never scheduled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Evaluation cadence. At least 10 seconds.
    #[serde(with = "duration::serde_str")]
    pub interval: Duration,
    /// What to query and how to reduce it.
    pub query: QuerySpec,
    /// When to fire.
    pub condition: Condition,
    /// Minimum gap between successive firing notifications.
    #[serde(with = "duration::serde_str")]
    pub throttle: Duration,
    /// Ordered notification actions. Never empty.
    pub actions: Vec<ActionSpec>,
    /// Opaque key/value metadata propagated to the template context.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}
