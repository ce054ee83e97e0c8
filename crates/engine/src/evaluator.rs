//! Rule evaluation: translate a rule and a point in time into a store
//! query, extract the scalar, and compare it against the threshold.
//!
//! All timestamps in the generated request resolve against the `now`
//! argument rather than the wall clock.

use chrono::{DateTime, SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use vaultize_core::{EvalErrorKind, EvaluationResult, Rule};
use vaultize_store::{SearchStore, StoreError};

/// Build the search body for one evaluation: a boolean conjunction of the
/// rule's filter with a range predicate on the time field, plus the
/// aggregation when the rule has one. `size: 0` because only totals and
/// aggregations are consumed.
pub fn build_search_body(rule: &Rule, now: DateTime<Utc>) -> serde_json::Value {
    let window = chrono::Duration::from_std(rule.query.window).unwrap_or_default();
    let from = now - window;

    let mut must: Vec<serde_json::Value> = Vec::new();
    if let Some(ref filter) = rule.query.filter {
        must.push(filter.clone());
    }
    let time_field = rule.query.time_field.as_str();
    let range = serde_json::json!({
        "range": {
            time_field: {
                "gte": from.to_rfc3339_opts(SecondsFormat::Millis, true),
                "lte": now.to_rfc3339_opts(SecondsFormat::Millis, true),
            }
        }
    });

    let mut body = serde_json::json!({
        "size": 0,
        "track_total_hits": true,
        "query": { "bool": { "must": must, "filter": [range] } },
    });
    if let Some(ref agg) = rule.query.aggregation {
        body["aggs"] = agg.to_store_body();
    }
    body
}

/// Evaluate `rule` as of `now`. Never panics and never returns a raw
/// store error; failures become verdict errors for the state machine.
pub async fn evaluate(
    store: &dyn SearchStore,
    rule: &Rule,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> EvaluationResult {
    let body = build_search_body(rule, now);

    let result = match store.search(&rule.query.indices, &body, cancel).await {
        Ok(result) => result,
        Err(e) => return EvaluationResult::failed(classify(&e), e.to_string()),
    };

    let value = match rule.query.projection_path() {
        None => {
            #[allow(clippy::cast_precision_loss)]
            let count = result.hit_total as f64;
            count
        }
        Some(path) => {
            let aggs = result.aggregations.unwrap_or(serde_json::Value::Null);
            match extract_scalar(&aggs, &path) {
                Some(v) => v,
                None => {
                    return EvaluationResult::failed(
                        EvalErrorKind::ValueExtract,
                        format!("no scalar at '{path}' in {}", excerpt(&aggs)),
                    );
                }
            }
        }
    };

    let condition_met = rule.condition.is_met(value);
    debug!(rule = %rule.name, value, condition_met, "evaluation completed");
    EvaluationResult::ok(value, condition_met)
}

fn classify(error: &StoreError) -> EvalErrorKind {
    match error {
        StoreError::IndexMissing(_) => EvalErrorKind::IndexMissing,
        StoreError::BadRequest(_) => EvalErrorKind::QueryRejected,
        StoreError::Timeout(_) => EvalErrorKind::Timeout,
        _ => EvalErrorKind::QueryFailed,
    }
}

/// Walk a dot-separated projection path through the aggregation response.
/// Keys may themselves contain dots (percentile buckets are keyed like
/// `"99.0"`), so every split point is tried, longest literal key first.
fn extract_scalar(value: &serde_json::Value, path: &str) -> Option<f64> {
    if path.is_empty() {
        return value.as_f64();
    }
    let obj = value.as_object()?;
    if let Some(v) = obj.get(path) {
        if let Some(n) = v.as_f64() {
            return Some(n);
        }
    }
    let mut split = 0;
    while let Some(dot) = path[split..].find('.') {
        let at = split + dot;
        let (head, rest) = (&path[..at], &path[at + 1..]);
        if let Some(child) = obj.get(head) {
            if let Some(n) = extract_scalar(child, rest) {
                return Some(n);
            }
        }
        split = at + 1;
    }
    None
}

fn excerpt(value: &serde_json::Value) -> String {
    let mut s = value.to_string();
    if s.len() > 200 {
        s.truncate(200);
        s.push('…');
    }
    s
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::TimeZone;

    use vaultize_core::{AggKind, Aggregation, CompareOp, Condition, QuerySpec};
    use vaultize_store::client::SearchResult;
    use vaultize_store::testing::MockSearchStore;

    use super::*;

    fn rule(aggregation: Option<Aggregation>, projection: Option<String>) -> Rule {
        Rule {
            name: "high-error-rate".into(),
            description: String::new(),
            enabled: true,
            interval: Duration::from_secs(60),
            query: QuerySpec {
                indices: vec!["logs-app-*".into()],
                time_field: "@timestamp".into(),
                window: Duration::from_secs(300),
                filter: Some(serde_json::json!({ "term": { "status": 500 } })),
                aggregation,
                projection,
            },
            condition: Condition {
                operator: CompareOp::Gt,
                threshold: 100.0,
            },
            throttle: Duration::from_secs(900),
            actions: Vec::new(),
            metadata: std::collections::HashMap::new(),
        }
    }

    #[test]
    fn search_body_resolves_window_against_argument() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let body = build_search_body(&rule(None, None), now);

        let range = &body["query"]["bool"]["filter"][0]["range"]["@timestamp"];
        assert_eq!(range["gte"], "2026-03-14T11:55:00.000Z");
        assert_eq!(range["lte"], "2026-03-14T12:00:00.000Z");
        assert_eq!(body["size"], 0);
        assert_eq!(body["track_total_hits"], true);
        assert_eq!(
            body["query"]["bool"]["must"][0],
            serde_json::json!({ "term": { "status": 500 } })
        );
        assert!(body.get("aggs").is_none());
    }

    #[test]
    fn search_body_includes_aggregation() {
        let now = Utc::now();
        let r = rule(
            Some(Aggregation {
                kind: AggKind::Avg,
                field: "latency_ms".into(),
                percent: None,
            }),
            None,
        );
        let body = build_search_body(&r, now);
        assert_eq!(
            body["aggs"],
            serde_json::json!({ "metric": { "avg": { "field": "latency_ms" } } })
        );
    }

    #[tokio::test]
    async fn count_rule_uses_hit_total() {
        let store = Arc::new(MockSearchStore::new());
        store.push_totals(&[150]);

        let result = evaluate(
            store.as_ref(),
            &rule(None, None),
            Utc::now(),
            &CancellationToken::new(),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(result.value, Some(150.0));
        assert!(result.condition_met);
    }

    #[tokio::test]
    async fn aggregation_rule_projects_scalar() {
        let store = Arc::new(MockSearchStore::new());
        store.push_search(Ok(SearchResult::with_total(10)
            .with_aggregations(serde_json::json!({ "metric": { "value": 250.5 } }))));

        let r = rule(
            Some(Aggregation {
                kind: AggKind::Avg,
                field: "latency_ms".into(),
                percent: None,
            }),
            None,
        );
        let result = evaluate(store.as_ref(), &r, Utc::now(), &CancellationToken::new()).await;

        assert_eq!(result.value, Some(250.5));
        assert!(result.condition_met);
    }

    #[tokio::test]
    async fn percentile_projection_handles_dotted_keys() {
        let store = Arc::new(MockSearchStore::new());
        store.push_search(Ok(SearchResult::with_total(10).with_aggregations(
            serde_json::json!({ "metric": { "values": { "99.0": 480.0 } } }),
        )));

        let r = rule(
            Some(Aggregation {
                kind: AggKind::Percentile,
                field: "latency_ms".into(),
                percent: Some(99.0),
            }),
            None,
        );
        let result = evaluate(store.as_ref(), &r, Utc::now(), &CancellationToken::new()).await;
        assert_eq!(result.value, Some(480.0));
    }

    #[tokio::test]
    async fn missing_projection_is_value_extract_error() {
        let store = Arc::new(MockSearchStore::new());
        store.push_search(Ok(SearchResult::with_total(0)
            .with_aggregations(serde_json::json!({ "metric": { "value": null } }))));

        let r = rule(
            Some(Aggregation {
                kind: AggKind::Avg,
                field: "latency_ms".into(),
                percent: None,
            }),
            None,
        );
        let result = evaluate(store.as_ref(), &r, Utc::now(), &CancellationToken::new()).await;

        assert_eq!(result.error, Some(EvalErrorKind::ValueExtract));
        assert!(result.value.is_none());
        assert!(!result.condition_met);
    }

    #[tokio::test]
    async fn store_errors_map_to_verdict_errors() {
        let cases = [
            (
                StoreError::Transport("connection refused".into()),
                EvalErrorKind::QueryFailed,
            ),
            (
                StoreError::IndexMissing("logs-app-*".into()),
                EvalErrorKind::IndexMissing,
            ),
            (
                StoreError::BadRequest("parsing_exception".into()),
                EvalErrorKind::QueryRejected,
            ),
            (
                StoreError::Timeout(Duration::from_secs(10)),
                EvalErrorKind::Timeout,
            ),
            (
                StoreError::Status {
                    status: 502,
                    body: String::new(),
                },
                EvalErrorKind::QueryFailed,
            ),
        ];

        for (store_err, expected) in cases {
            let store = Arc::new(MockSearchStore::new());
            store.push_search(Err(store_err));
            let result =
                evaluate(store.as_ref(), &rule(None, None), Utc::now(), &CancellationToken::new())
                    .await;
            assert_eq!(result.error, Some(expected));
        }
    }

    #[test]
    fn extract_scalar_tries_every_split() {
        let aggs = serde_json::json!({
            "metric": { "values": { "95.0": 12.5 } }
        });
        assert_eq!(extract_scalar(&aggs, "metric.values.95.0"), Some(12.5));
        assert_eq!(extract_scalar(&aggs, "metric.values.99.0"), None);
        assert_eq!(extract_scalar(&aggs, "missing.value"), None);
    }
}
