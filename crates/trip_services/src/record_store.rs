//! Multi-collection document store used by the trip procedures.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::types::StoreError;

/// Logical collections of the record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Trips, keyed by trip id
    Trips,
    /// Subscribers, keyed by subscriber id
    Subscribers,
    /// Subscriptions, keyed by `<trip_id>_<date>`
    Subscriptions,
    /// Active requests, keyed by request id
    ActiveRequests,
}

impl Collection {
    /// Collection name as stored by persistent backends
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Trips => "trips",
            Collection::Subscribers => "subscribers",
            Collection::Subscriptions => "subscriptions",
            Collection::ActiveRequests => "active_requests",
        }
    }
}

/// Key of the subscription document for one trip date
pub fn subscription_key(trip_id: &str, date: &NaiveDate) -> String {
    format!("{}_{}", trip_id, date.format("%Y-%m-%d"))
}

/// Document store with per-document atomicity and no cross-document transactions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read a document; `Ok(None)` when it does not exist
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError>;

    /// Create or replace a document
    async fn put(&self, collection: Collection, key: &str, document: Value)
    -> Result<(), StoreError>;

    /// Remove a document; removing a missing document succeeds
    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError>;

    /// Every document of a collection
    async fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError>;
}

/// Read and decode a typed document
pub async fn load<T: DeserializeOwned>(
    store: &dyn RecordStore,
    collection: Collection,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(collection, key).await? {
        Some(document) => Ok(Some(serde_json::from_value(document)?)),
        None => Ok(None),
    }
}

/// Encode and write a typed document
pub async fn save<T: Serialize>(
    store: &dyn RecordStore,
    collection: Collection,
    key: &str,
    record: &T,
) -> Result<(), StoreError> {
    store
        .put(collection, key, serde_json::to_value(record)?)
        .await
}

/// Read and decode every document of a collection
pub async fn load_all<T: DeserializeOwned>(
    store: &dyn RecordStore,
    collection: Collection,
) -> Result<Vec<T>, StoreError> {
    store
        .list(collection)
        .await?
        .into_iter()
        .map(|document| serde_json::from_value(document).map_err(StoreError::from))
        .collect()
}

#[derive(Debug, Default)]
struct InMemoryState {
    documents: HashMap<(Collection, String), Value>,
    writes: HashMap<Collection, usize>,
    puts: HashMap<Collection, usize>,
    /// Put count at which the collection starts failing puts
    fail_puts_after: HashMap<Collection, usize>,
    fail_deletes: HashMap<Collection, bool>,
    fail_reads: HashMap<Collection, bool>,
}

/// In-memory record store for testing and local runs
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryRecordStore {
    /// Creates a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures puts to `collection` to fail once `allowed` more puts have succeeded
    pub async fn set_fail_on_put(&self, collection: Collection, allowed: usize) {
        let mut state = self.state.write().await;
        let done = state.puts.get(&collection).copied().unwrap_or(0);
        state.fail_puts_after.insert(collection, done + allowed);
    }

    /// Configures deletes from `collection` to fail
    pub async fn set_fail_on_delete(&self, collection: Collection, fail: bool) {
        self.state.write().await.fail_deletes.insert(collection, fail);
    }

    /// Configures reads from `collection` to fail
    pub async fn set_fail_on_read(&self, collection: Collection, fail: bool) {
        self.state.write().await.fail_reads.insert(collection, fail);
    }

    /// Clears all injected failures
    pub async fn clear_failures(&self) {
        let mut state = self.state.write().await;
        state.fail_puts_after.clear();
        state.fail_deletes.clear();
        state.fail_reads.clear();
    }

    /// Number of successful writes (puts and deletes) to a collection
    pub async fn write_count(&self, collection: Collection) -> usize {
        self.state
            .read()
            .await
            .writes
            .get(&collection)
            .copied()
            .unwrap_or(0)
    }

    /// Number of documents in a collection
    pub async fn len(&self, collection: Collection) -> usize {
        self.state
            .read()
            .await
            .documents
            .keys()
            .filter(|(c, _)| *c == collection)
            .count()
    }

    async fn check_read(&self, collection: Collection) -> Result<(), StoreError> {
        if self
            .state
            .read()
            .await
            .fail_reads
            .get(&collection)
            .copied()
            .unwrap_or(false)
        {
            return Err(injected("read", collection));
        }
        Ok(())
    }
}

fn injected(action: &str, collection: Collection) -> StoreError {
    StoreError::Persistence(format!(
        "Injected {} failure on {}",
        action,
        collection.as_str()
    ))
}

fn record_put(state: &mut InMemoryState, collection: Collection) -> Result<(), StoreError> {
    let done = state.puts.get(&collection).copied().unwrap_or(0);
    if let Some(limit) = state.fail_puts_after.get(&collection)
        && done >= *limit
    {
        return Err(injected("write", collection));
    }
    state.puts.insert(collection, done + 1);
    *state.writes.entry(collection).or_default() += 1;
    Ok(())
}

fn record_delete(state: &mut InMemoryState, collection: Collection) -> Result<(), StoreError> {
    if state.fail_deletes.get(&collection).copied().unwrap_or(false) {
        return Err(injected("delete", collection));
    }
    *state.writes.entry(collection).or_default() += 1;
    Ok(())
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError> {
        self.check_read(collection).await?;
        Ok(self
            .state
            .read()
            .await
            .documents
            .get(&(collection, key.to_string()))
            .cloned())
    }

    async fn put(
        &self,
        collection: Collection,
        key: &str,
        document: Value,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        record_put(&mut state, collection)?;
        state.documents.insert((collection, key.to_string()), document);
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        record_delete(&mut state, collection)?;
        state.documents.remove(&(collection, key.to_string()));
        Ok(())
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        self.check_read(collection).await?;
        let state = self.state.read().await;
        let mut documents: Vec<(&String, &Value)> = state
            .documents
            .iter()
            .filter(|((c, _), _)| *c == collection)
            .map(|((_, key), document)| (key, document))
            .collect();
        documents.sort_by(|a, b| a.0.cmp(b.0));
        Ok(documents.into_iter().map(|(_, d)| d.clone()).collect())
    }
}

/// Store wrapper that suspends around every call, the way a networked backend would
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct YieldingStore {
    pub(crate) inner: InMemoryRecordStore,
}

#[cfg(test)]
#[async_trait]
impl RecordStore for YieldingStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError> {
        tokio::task::yield_now().await;
        let document = self.inner.get(collection, key).await;
        tokio::task::yield_now().await;
        document
    }

    async fn put(
        &self,
        collection: Collection,
        key: &str,
        document: Value,
    ) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.put(collection, key, document).await
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.delete(collection, key).await
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        tokio::task::yield_now().await;
        let documents = self.inner.list(collection).await;
        tokio::task::yield_now().await;
        documents
    }
}
