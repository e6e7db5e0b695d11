//! In-process ordered storage
//!
//! Keys iterate lexicographically, so prefix scans and cursors are range reads.

use super::{apply_patch, decode, encode, merge_json, require_object, ListFilter, Page, Storage};
use crate::error::{RbacError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::ops::Bound;
use tracing::debug;

/// Ordered in-memory store, for single-process use and tests
pub struct MemoryStorage<T> {
    records: RwLock<BTreeMap<String, Value>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> MemoryStorage<T> {
    pub fn new() -> Self {
        MemoryStorage {
            records: RwLock::new(BTreeMap::new()),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl<T> Default for MemoryStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Storage<T> for MemoryStorage<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.records.read().contains_key(id))
    }

    async fn read(&self, id: &str) -> Result<T> {
        let value = self
            .records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RbacError::NotFound(id.to_string()))?;
        decode(value)
    }

    async fn create(&self, id: &str, datum: T) -> Result<T> {
        let value = encode(&datum)?;
        let mut records = self.records.write();
        if records.contains_key(id) {
            return Err(RbacError::Conflict(id.to_string()));
        }
        records.insert(id.to_string(), value);
        Ok(datum)
    }

    async fn update(&self, id: &str, partial: Value) -> Result<T> {
        let partial = require_object(partial)?;
        let mut records = self.records.write();
        let mut merged = records
            .get(id)
            .cloned()
            .ok_or_else(|| RbacError::NotFound(id.to_string()))?;
        merge_json(&mut merged, Value::Object(partial));
        let entity = decode(merged.clone())?;
        records.insert(id.to_string(), merged);
        Ok(entity)
    }

    async fn patch(&self, id: &str, datum: Value) -> Result<T> {
        let entity = {
            let mut records = self.records.write();
            let updated = apply_patch(id, records.get(id).cloned(), datum)?;
            let entity = decode(updated.clone())?;
            records.insert(id.to_string(), updated);
            entity
        };
        debug!("Patched {}", id);
        Ok(entity)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.records.write().remove(id);
        Ok(())
    }

    async fn list(&self, filter: &ListFilter) -> Result<Page<T>> {
        let limit = filter.effective_limit();
        let prefix = filter.prefix();

        let lower = match filter.resume_after() {
            Some(cursor) => Bound::Excluded(cursor.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let chunk: Vec<(String, Value)> = {
            let records = self.records.read();
            records
                .range((lower, Bound::Unbounded))
                .skip_while(|(key, _)| key.as_str() < prefix)
                .take_while(|(key, _)| key.starts_with(prefix))
                .take(limit)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };

        let cursor = match chunk.last() {
            Some((key, _)) if chunk.len() == limit => key.clone(),
            _ => String::new(),
        };

        let data = chunk
            .into_iter()
            .map(|(_, value)| decode(value))
            .collect::<Result<Vec<T>>>()?;

        Ok(Page { cursor, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_prefix_scan_is_ordered() {
        let storage: MemoryStorage<Value> = MemoryStorage::new();
        for id in ["b/2", "a/1", "b/1", "c/1", "b/3"] {
            storage.create(id, json!({ "id": id })).await.unwrap();
        }

        let page = storage
            .list(&ListFilter::with_prefix("b/").limit(10))
            .await
            .unwrap();
        let ids: Vec<_> = page.data.iter().map(|v| v["id"].clone()).collect();
        assert_eq!(ids, vec![json!("b/1"), json!("b/2"), json!("b/3")]);
        assert!(page.is_last());
    }

    #[tokio::test]
    async fn test_cursor_resumes_after_last_key() {
        let storage: MemoryStorage<Value> = MemoryStorage::new();
        for i in 0..5 {
            let id = format!("k{}", i);
            storage.create(&id, json!({ "id": id })).await.unwrap();
        }

        let first = storage.list(&ListFilter::default().limit(2)).await.unwrap();
        assert_eq!(first.cursor, "k1");

        let second = storage
            .list(&ListFilter::default().limit(2).after(first.cursor))
            .await
            .unwrap();
        assert_eq!(second.data[0]["id"], "k2");
        assert_eq!(second.cursor, "k3");

        let third = storage
            .list(&ListFilter::default().limit(2).after(second.cursor))
            .await
            .unwrap();
        assert_eq!(third.data.len(), 1);
        assert!(third.is_last());
    }

    #[tokio::test]
    async fn test_cursor_before_prefix_is_clamped() {
        let storage: MemoryStorage<Value> = MemoryStorage::new();
        for id in ["a", "b/1", "b/2", "c"] {
            storage.create(id, json!({ "id": id })).await.unwrap();
        }

        let page = storage
            .list(&ListFilter::with_prefix("b/").after("a"))
            .await
            .unwrap();
        assert_eq!(page.data.len(), 2);
    }

    #[tokio::test]
    async fn test_len() {
        let storage: MemoryStorage<Value> = MemoryStorage::new();
        assert!(storage.is_empty());
        storage.create("x", json!({})).await.unwrap();
        storage.remove("x").await.unwrap();
        storage.remove("x").await.unwrap();
        assert_eq!(storage.len(), 0);
    }
}
