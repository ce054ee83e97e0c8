use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vaultize_core::{AlertEvent, RuleState};
use vaultize_store::SearchStore;

use crate::error::StateError;

/// Upper bound on rules recovered at startup.
const LOAD_ALL_SIZE: usize = 10_000;

/// Default and maximum page sizes for history queries.
const HISTORY_DEFAULT_LIMIT: usize = 100;
const HISTORY_MAX_LIMIT: usize = 1_000;

/// Filters for the history endpoint.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub rule: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(HISTORY_DEFAULT_LIMIT)
            .min(HISTORY_MAX_LIMIT)
    }
}

/// Persists per-rule lifecycle state and the append-only alert history in
/// two dedicated store indices.
///
/// State documents are keyed by rule name and overwritten in place;
/// history documents are keyed by their time-sorted event id and never
/// touched again.
pub struct StateStore {
    store: Arc<dyn SearchStore>,
    state_index: String,
    history_index: String,
}

/// On-disk shape of a state document: the rule name plus the flattened
/// [`RuleState`].
#[derive(Deserialize)]
struct StateDoc {
    rule_name: String,
    #[serde(flatten)]
    state: RuleState,
}

impl StateStore {
    pub fn new(
        store: Arc<dyn SearchStore>,
        state_index: impl Into<String>,
        history_index: impl Into<String>,
    ) -> Self {
        Self {
            store,
            state_index: state_index.into(),
            history_index: history_index.into(),
        }
    }

    /// Create both indices with their mappings if absent. Called once at
    /// startup before anything else touches the store.
    pub async fn ensure_indices(&self, cancel: &CancellationToken) -> Result<(), StateError> {
        self.store
            .ensure_index(&self.state_index, &state_mapping(), cancel)
            .await?;
        self.store
            .ensure_index(&self.history_index, &history_mapping(), cancel)
            .await?;
        Ok(())
    }

    /// Recover all persisted rule states. Documents that fail to decode
    /// are logged and skipped so one stale record cannot block startup.
    pub async fn load_all(
        &self,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, RuleState>, StateError> {
        let body = serde_json::json!({
            "query": { "match_all": {} },
            "size": LOAD_ALL_SIZE,
        });
        let result = self
            .store
            .search(std::slice::from_ref(&self.state_index), &body, cancel)
            .await?;

        let mut states = HashMap::new();
        for doc in result.documents {
            match serde_json::from_value::<StateDoc>(doc) {
                Ok(decoded) => {
                    states.insert(decoded.rule_name, decoded.state);
                }
                Err(e) => {
                    warn!(index = %self.state_index, error = %e, "skipping undecodable state document");
                }
            }
        }
        debug!(count = states.len(), "recovered rule states");
        Ok(states)
    }

    /// Overwrite the state document for a rule (doc id = rule name).
    pub async fn persist(
        &self,
        rule_name: &str,
        state: &RuleState,
        cancel: &CancellationToken,
    ) -> Result<(), StateError> {
        let mut doc = serde_json::to_value(state).map_err(|e| StateError::Decode(e.to_string()))?;
        doc["rule_name"] = serde_json::Value::String(rule_name.to_owned());
        self.store
            .index_document(&self.state_index, Some(rule_name), &doc, cancel)
            .await?;
        Ok(())
    }

    /// Append an event to the history index.
    pub async fn append_event(
        &self,
        event: &AlertEvent,
        cancel: &CancellationToken,
    ) -> Result<(), StateError> {
        let doc = serde_json::to_value(event).map_err(|e| StateError::Decode(e.to_string()))?;
        let id = event.id.to_string();
        self.store
            .index_document(&self.history_index, Some(&id), &doc, cancel)
            .await?;
        Ok(())
    }

    /// Query the history index, newest first.
    pub async fn history(
        &self,
        query: &HistoryQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<AlertEvent>, StateError> {
        let mut must = Vec::new();
        if let Some(ref rule) = query.rule {
            must.push(serde_json::json!({ "term": { "rule_name": rule } }));
        }
        let mut filter = Vec::new();
        if let Some(since) = query.since {
            filter.push(serde_json::json!({
                "range": { "timestamp": { "gte": since.to_rfc3339() } }
            }));
        }

        let query_body = if must.is_empty() && filter.is_empty() {
            serde_json::json!({ "match_all": {} })
        } else {
            serde_json::json!({ "bool": { "must": must, "filter": filter } })
        };

        let body = serde_json::json!({
            "query": query_body,
            "sort": [{ "timestamp": "desc" }],
            "size": query.effective_limit(),
        });

        let result = self
            .store
            .search(std::slice::from_ref(&self.history_index), &body, cancel)
            .await?;

        let mut events = Vec::with_capacity(result.documents.len());
        for doc in result.documents {
            match serde_json::from_value::<AlertEvent>(doc) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(index = %self.history_index, error = %e, "skipping undecodable history document");
                }
            }
        }
        Ok(events)
    }
}

fn state_mapping() -> serde_json::Value {
    serde_json::json!({
        "mappings": {
            "properties": {
                "rule_name":           { "type": "keyword" },
                "state":               { "type": "keyword" },
                "last_eval_at":        { "type": "date" },
                "last_value":          { "type": "double" },
                "condition_met_since": { "type": "date" },
                "last_notified_at":    { "type": "date" },
                "consecutive_errors":  { "type": "long" },
                "last_error":          { "type": "keyword" }
            }
        }
    })
}

fn history_mapping() -> serde_json::Value {
    serde_json::json!({
        "mappings": {
            "properties": {
                "id":             { "type": "keyword" },
                "rule_name":      { "type": "keyword" },
                "kind":           { "type": "keyword" },
                "prior_state":    { "type": "keyword" },
                "new_state":      { "type": "keyword" },
                "timestamp":      { "type": "date" },
                "observed_value": { "type": "double" },
                "threshold":      { "type": "double" },
                "operator":       { "type": "keyword" },
                "error":          { "type": "keyword" },
                "delivery":       { "type": "object", "enabled": false }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use vaultize_core::{AlertState, CompareOp};
    use vaultize_store::client::SearchResult;
    use vaultize_store::testing::MockSearchStore;

    use super::*;

    fn store() -> (Arc<MockSearchStore>, StateStore) {
        let mock = Arc::new(MockSearchStore::new());
        let state = StateStore::new(
            Arc::clone(&mock) as Arc<dyn SearchStore>,
            "vaultize-alerts-state",
            "vaultize-alerts-history",
        );
        (mock, state)
    }

    #[tokio::test]
    async fn ensure_indices_creates_both() {
        let (mock, state) = store();
        state.ensure_indices(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            mock.ensured(),
            vec!["vaultize-alerts-state", "vaultize-alerts-history"]
        );
    }

    #[tokio::test]
    async fn persist_writes_doc_keyed_by_rule_name() {
        let (mock, state) = store();
        let rule_state = RuleState {
            state: AlertState::Firing,
            last_value: Some(150.0),
            condition_met_since: Some(Utc::now()),
            ..RuleState::default()
        };

        state
            .persist("high-error-rate", &rule_state, &CancellationToken::new())
            .await
            .unwrap();

        let docs = mock.indexed_into("alerts-state");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id.as_deref(), Some("high-error-rate"));
        assert_eq!(docs[0].doc["rule_name"], "high-error-rate");
        assert_eq!(docs[0].doc["state"], "FIRING");
    }

    #[tokio::test]
    async fn load_all_skips_undecodable_documents() {
        let (mock, state) = store();
        let good = serde_json::json!({
            "rule_name": "good-rule",
            "state": "FIRING",
            "last_value": 150.0,
            "condition_met_since": Utc::now().to_rfc3339(),
        });
        let corrupt = serde_json::json!({ "state": 42 });
        mock.push_search(Ok(SearchResult {
            hit_total: 2,
            documents: vec![good, corrupt],
            aggregations: None,
            took_ms: 1,
        }));

        let states = state.load_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states["good-rule"].state, AlertState::Firing);
    }

    #[tokio::test]
    async fn persist_then_load_roundtrip() {
        let (mock, state) = store();
        let rule_state = RuleState {
            state: AlertState::Firing,
            last_eval_at: Some(Utc::now()),
            last_value: Some(150.0),
            condition_met_since: Some(Utc::now()),
            last_notified_at: Some(Utc::now()),
            consecutive_errors: 0,
            last_error: None,
        };
        state
            .persist("r", &rule_state, &CancellationToken::new())
            .await
            .unwrap();

        let doc = mock.indexed()[0].doc.clone();
        mock.push_search(Ok(SearchResult {
            hit_total: 1,
            documents: vec![doc],
            aggregations: None,
            took_ms: 1,
        }));

        let states = state.load_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(states["r"], rule_state);
    }

    #[tokio::test]
    async fn append_event_uses_event_id() {
        let (mock, state) = store();
        let event = AlertEvent::transition(
            "r",
            AlertState::Ok,
            AlertState::Firing,
            Utc::now(),
            Some(150.0),
            100.0,
            CompareOp::Gt,
        );
        state
            .append_event(&event, &CancellationToken::new())
            .await
            .unwrap();

        let docs = mock.indexed_into("alerts-history");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id.as_deref(), Some(event.id.to_string().as_str()));
        assert_eq!(docs[0].doc["new_state"], "FIRING");
    }

    #[tokio::test]
    async fn history_query_filters_and_limits() {
        let (mock, state) = store();
        let event = AlertEvent::transition(
            "r",
            AlertState::Ok,
            AlertState::Firing,
            Utc::now(),
            Some(150.0),
            100.0,
            CompareOp::Gt,
        );
        mock.push_search(Ok(SearchResult {
            hit_total: 1,
            documents: vec![serde_json::to_value(&event).unwrap()],
            aggregations: None,
            took_ms: 1,
        }));

        let since = Utc::now();
        let events = state
            .history(
                &HistoryQuery {
                    rule: Some("r".to_owned()),
                    since: Some(since),
                    limit: Some(10),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0], event);

        let (indices, body) = mock.searches().pop().unwrap();
        assert_eq!(indices, vec!["vaultize-alerts-history"]);
        assert_eq!(body["size"], 10);
        assert_eq!(body["query"]["bool"]["must"][0]["term"]["rule_name"], "r");
    }

    #[tokio::test]
    async fn history_limit_is_capped() {
        let query = HistoryQuery {
            limit: Some(50_000),
            ..HistoryQuery::default()
        };
        assert_eq!(query.effective_limit(), HISTORY_MAX_LIMIT);
    }
}
