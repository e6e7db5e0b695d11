//! Storage on a replicated key-value store
//!
//! The store has no native range scan, so each entity is kept as a field hash
//! (`{db}:{id}`, every top-level field JSON-encoded) plus an id index set
//! (`{db}!s`). Listing scans the index for the prefix, then reads the page in
//! parallel.

use super::{apply_patch, decode, encode, merge_json, require_object, ListFilter, Page, Storage};
use crate::error::{RbacError, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Index-set and field-hash primitives of the key-value store
#[async_trait]
pub trait KvClient: Send + Sync {
    async fn set_add(&self, set: &str, member: &str) -> Result<()>;

    async fn set_remove(&self, set: &str, member: &str) -> Result<()>;

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool>;

    /// Every member of `set` starting with `prefix`, in no particular order
    async fn set_scan(&self, set: &str, prefix: &str) -> Result<Vec<String>>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl<C: KvClient + ?Sized> KvClient for Arc<C> {
    async fn set_add(&self, set: &str, member: &str) -> Result<()> {
        (**self).set_add(set, member).await
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<()> {
        (**self).set_remove(set, member).await
    }

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool> {
        (**self).set_contains(set, member).await
    }

    async fn set_scan(&self, set: &str, prefix: &str) -> Result<Vec<String>> {
        (**self).set_scan(set, prefix).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        (**self).hash_get_all(key).await
    }

    async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        (**self).hash_set(key, fields).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}

#[derive(Default)]
struct KvState {
    sets: HashMap<String, BTreeSet<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// In-process [`KvClient`], for tests and single-node deployments
#[derive(Clone, Default)]
pub struct MemoryKv {
    state: Arc<Mutex<KvState>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn set_add(&self, set: &str, member: &str) -> Result<()> {
        self.state
            .lock()
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<()> {
        if let Some(members) = self.state.lock().sets.get_mut(set) {
            members.remove(member);
        }
        Ok(())
    }

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .sets
            .get(set)
            .map_or(false, |members| members.contains(member)))
    }

    async fn set_scan(&self, set: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .sets
            .get(set)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| m.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .state
            .lock()
            .hashes
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        let mut state = self.state.lock();
        let hash = state.hashes.entry(key.to_string()).or_default();
        hash.extend(fields);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.state.lock().hashes.remove(key);
        Ok(())
    }
}

/// [`Storage`] backed by a [`KvClient`]
pub struct KvStorage<T, C> {
    client: C,
    db: String,
    index: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C: KvClient> KvStorage<T, C> {
    /// `db` namespaces every key written by this storage
    pub fn new(client: C, db: impl Into<String>) -> Self {
        let db = db.into();
        KvStorage {
            index: format!("{}!s", db),
            client,
            db,
            _marker: PhantomData,
        }
    }

    fn hash_key(&self, id: &str) -> String {
        format!("{}:{}", self.db, id)
    }

    async fn read_value(&self, id: &str) -> Result<Option<Value>> {
        let key = self.hash_key(id);
        let (exists, fields) = futures::try_join!(
            self.client.set_contains(&self.index, id),
            self.client.hash_get_all(&key),
        )?;

        if !exists {
            return Ok(None);
        }
        deserialize_fields(fields).map(Some)
    }

    async fn write_value(&self, id: &str, value: Value) -> Result<()> {
        let fields = serialize_fields(require_object(value)?)?;
        let key = self.hash_key(id);
        futures::try_join!(
            self.client.set_add(&self.index, id),
            self.client.hash_set(&key, fields),
        )?;
        Ok(())
    }
}

fn serialize_fields(record: Map<String, Value>) -> Result<Vec<(String, String)>> {
    record
        .into_iter()
        .map(|(field, value)| -> Result<(String, String)> {
            Ok((field, serde_json::to_string(&value)?))
        })
        .collect()
}

fn deserialize_fields(fields: HashMap<String, String>) -> Result<Value> {
    let mut record = Map::new();
    for (field, raw) in fields {
        record.insert(field, serde_json::from_str(&raw)?);
    }
    Ok(Value::Object(record))
}

#[async_trait]
impl<T, C> Storage<T> for KvStorage<T, C>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    C: KvClient,
{
    async fn exists(&self, id: &str) -> Result<bool> {
        self.client.set_contains(&self.index, id).await
    }

    async fn read(&self, id: &str) -> Result<T> {
        match self.read_value(id).await? {
            Some(value) => decode(value),
            None => Err(RbacError::NotFound(id.to_string())),
        }
    }

    async fn create(&self, id: &str, datum: T) -> Result<T> {
        if self.exists(id).await? {
            return Err(RbacError::Conflict(id.to_string()));
        }
        self.write_value(id, encode(&datum)?).await?;
        Ok(datum)
    }

    async fn update(&self, id: &str, partial: Value) -> Result<T> {
        let partial = require_object(partial)?;
        let mut stored = self
            .read_value(id)
            .await?
            .ok_or_else(|| RbacError::NotFound(id.to_string()))?;
        merge_json(&mut stored, Value::Object(partial));
        let entity = decode(stored.clone())?;
        self.write_value(id, stored).await?;
        Ok(entity)
    }

    async fn patch(&self, id: &str, datum: Value) -> Result<T> {
        let stored = self.read_value(id).await?;
        let updated = apply_patch(id, stored, datum)?;
        let entity = decode(updated.clone())?;
        self.write_value(id, updated).await?;
        debug!("Patched {}:{}", self.db, id);
        Ok(entity)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let key = self.hash_key(id);
        futures::try_join!(
            self.client.delete(&key),
            self.client.set_remove(&self.index, id),
        )?;
        Ok(())
    }

    async fn list(&self, filter: &ListFilter) -> Result<Page<T>> {
        let limit = filter.effective_limit();

        let mut ids = self.client.set_scan(&self.index, filter.prefix()).await?;
        ids.sort();
        if let Some(cursor) = filter.resume_after() {
            ids.retain(|id| id.as_str() > cursor);
        }
        ids.truncate(limit);

        let cursor = match ids.last() {
            Some(last) if ids.len() == limit => last.clone(),
            _ => String::new(),
        };

        let reads = ids.iter().map(|id| async move {
            let key = self.hash_key(id);
            let fields = self.client.hash_get_all(&key).await?;
            decode::<T>(deserialize_fields(fields)?)
        });
        let data = try_join_all(reads).await?;

        Ok(Page { cursor, data })
    }
}
