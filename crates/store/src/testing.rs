//! In-memory [`SearchStore`] double for tests in downstream crates.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::client::{SearchResult, SearchStore};
use crate::error::StoreError;

/// A document recorded by [`MockSearchStore::index_document`].
#[derive(Debug, Clone)]
pub struct IndexedDoc {
    pub index: String,
    pub id: Option<String>,
    pub doc: serde_json::Value,
}

/// Scripted in-memory store. Search calls pop canned results in FIFO
/// order (an empty queue yields a zero-hit result); indexed documents and
/// ensured indices are recorded for assertions.
#[derive(Default)]
pub struct MockSearchStore {
    search_results: Mutex<VecDeque<Result<SearchResult, StoreError>>>,
    indexed: Mutex<Vec<IndexedDoc>>,
    ensured: Mutex<Vec<String>>,
    searches: Mutex<Vec<(Vec<String>, serde_json::Value)>>,
    fail_indexing: Mutex<bool>,
    search_delay: Mutex<Option<std::time::Duration>>,
}

impl MockSearchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result for the next search call.
    pub fn push_search(&self, result: Result<SearchResult, StoreError>) {
        self.search_results.lock().unwrap().push_back(result);
    }

    /// Queue `n` identical successful results.
    pub fn push_totals(&self, totals: &[u64]) {
        for &t in totals {
            self.push_search(Ok(SearchResult::with_total(t)));
        }
    }

    /// Make every subsequent `index_document` call fail.
    pub fn fail_indexing(&self, fail: bool) {
        *self.fail_indexing.lock().unwrap() = fail;
    }

    /// Delay every subsequent search; used to simulate slow evaluations.
    pub fn set_search_delay(&self, delay: std::time::Duration) {
        *self.search_delay.lock().unwrap() = Some(delay);
    }

    /// All documents indexed so far.
    pub fn indexed(&self) -> Vec<IndexedDoc> {
        self.indexed.lock().unwrap().clone()
    }

    /// Documents indexed into indices whose name contains `needle`.
    pub fn indexed_into(&self, needle: &str) -> Vec<IndexedDoc> {
        self.indexed()
            .into_iter()
            .filter(|d| d.index.contains(needle))
            .collect()
    }

    /// Index names passed to `ensure_index`.
    pub fn ensured(&self) -> Vec<String> {
        self.ensured.lock().unwrap().clone()
    }

    /// Search request bodies observed so far.
    pub fn searches(&self) -> Vec<(Vec<String>, serde_json::Value)> {
        self.searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchStore for MockSearchStore {
    async fn search(
        &self,
        indices: &[String],
        body: &serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<SearchResult, StoreError> {
        self.searches
            .lock()
            .unwrap()
            .push((indices.to_vec(), body.clone()));
        let delay = *self.search_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.search_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SearchResult::with_total(0)))
    }

    async fn count(
        &self,
        indices: &[String],
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        self.search(indices, body, cancel).await.map(|r| r.hit_total)
    }

    async fn index_document(
        &self,
        index: &str,
        id: Option<&str>,
        doc: &serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        if *self.fail_indexing.lock().unwrap() {
            return Err(StoreError::Status {
                status: 503,
                body: "mock indexing failure".to_owned(),
            });
        }
        self.indexed.lock().unwrap().push(IndexedDoc {
            index: index.to_owned(),
            id: id.map(str::to_owned),
            doc: doc.clone(),
        });
        Ok(())
    }

    async fn ensure_index(
        &self,
        index: &str,
        _mapping: &serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        self.ensured.lock().unwrap().push(index.to_owned());
        Ok(())
    }
}
