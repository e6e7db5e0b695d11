//! Versioned storage for permissions and roles
//!
//! One contract, three backends:
//! - [`MemoryStorage`] - in-process ordered map with native prefix scans
//! - [`KvStorage`] - field hashes plus an id index on a replicated key-value store
//! - [`RemoteStorage`] - forwards every call over a message bus to the owning process
//!
//! Entities are opaque to storage except for `id` and, on `patch`, `version`.

mod kv;
mod memory;
#[cfg(feature = "redis")]
mod redis_kv;
mod remote;

pub use kv::{KvClient, KvStorage, MemoryKv};
pub use memory::MemoryStorage;
#[cfg(feature = "redis")]
pub use redis_kv::RedisKv;
pub use remote::{
    serve_storage, LocalBus, MessageBus, Operation, RemoteRequest, RemoteResponse, RemoteStorage,
    RequestHandler, RoutingTable, StorageResponder,
};

use crate::core::validation::compare_versions;
use crate::error::{RbacError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tracing::warn;

/// Page size used when a filter does not specify one
pub const DEFAULT_LIMIT: usize = 20;

/// Listing filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl ListFilter {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        ListFilter {
            prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).max(1)
    }

    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }

    /// Cursor to resume after, if any. Empty cursors mean "from the start".
    pub fn resume_after(&self) -> Option<&str> {
        self.cursor.as_deref().filter(|c| !c.is_empty())
    }
}

/// One page of a listing. An empty `cursor` means iteration is finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub cursor: String,
    pub data: Vec<T>,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        self.cursor.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            cursor: self.cursor,
            data: self.data.into_iter().map(f).collect(),
        }
    }
}

/// Storage contract shared by all backends
#[async_trait]
pub trait Storage<T>: Send + Sync {
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Fails with `NotFound` if absent
    async fn read(&self, id: &str) -> Result<T>;

    /// Fails with `Conflict` if `id` is taken
    async fn create(&self, id: &str, datum: T) -> Result<T>;

    /// Merge `partial` into an existing record. Arrays in `partial` replace stored arrays.
    async fn update(&self, id: &str, partial: Value) -> Result<T>;

    /// Upsert gated on semver `version`. Lower versions fail with the soft `VersionLow`.
    async fn patch(&self, id: &str, datum: Value) -> Result<T>;

    /// Idempotent
    async fn remove(&self, id: &str) -> Result<()>;

    async fn list(&self, filter: &ListFilter) -> Result<Page<T>>;
}

/// Deep-merge `patch` into `base`. Objects merge key by key; anything else
/// in `patch` (arrays included) replaces the stored value.
pub(crate) fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

/// Require a structured object for partial writes
pub(crate) fn require_object(datum: Value) -> Result<Map<String, Value>> {
    match datum {
        Value::Object(map) => Ok(map),
        other => Err(RbacError::InvalidFormat(format!(
            "expected an object, got {}",
            type_name(&other)
        ))),
    }
}

/// Validate a versioned partial and return its version
pub(crate) fn require_version(datum: &Map<String, Value>) -> Result<String> {
    let version = datum
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| RbacError::InvalidFormat("missing \"version\"".to_string()))?;
    if semver::Version::parse(version).is_err() {
        return Err(RbacError::InvalidFormat(format!(
            "\"version\" is not semver: {}",
            version
        )));
    }
    Ok(version.to_string())
}

/// Apply the version gate of `patch` to a stored record
///
/// Returns the record to persist, or `VersionLow` if the offered version is older.
pub(crate) fn apply_patch(id: &str, stored: Option<Value>, datum: Value) -> Result<Value> {
    let partial = require_object(datum)?;
    let offered = require_version(&partial)?;

    let Some(mut stored) = stored else {
        return Ok(Value::Object(partial));
    };

    let current = stored
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match compare_versions(&offered, &current) {
        Some(Ordering::Less) => {
            return Err(RbacError::VersionLow {
                id: id.to_string(),
                stored: current,
                offered,
            })
        }
        Some(_) => {}
        None => warn!("Stored version of {} is not semver ({:?}), overwriting", id, current),
    }

    merge_json(&mut stored, Value::Object(partial));
    Ok(stored)
}

pub(crate) fn encode<T: Serialize>(datum: &T) -> Result<Value> {
    Ok(serde_json::to_value(datum)?)
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
