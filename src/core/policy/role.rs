//! Roles: named bundles of pattern -> verb grants
//!
//! The persisted [`RoleRecord`] and the compiled [`PermissionMatcher`] are kept
//! together behind [`Role`], whose mutators update both in one call.

use super::matcher::PermissionMatcher;
use super::permission::Verb;
use crate::core::validation::normalize_pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scalar annotation value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Number(value.into())
    }
}

/// Persisted role shape
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoleRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: BTreeMap<String, Vec<Verb>>,
    #[serde(default)]
    pub meta: BTreeMap<String, MetaValue>,
}

impl RoleRecord {
    pub fn new(name: impl Into<String>) -> Self {
        RoleRecord {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Grant `verbs` on `pattern`. Spellings of the same pattern share one entry.
    pub fn grant(mut self, pattern: impl Into<String>, verbs: &[Verb]) -> Self {
        merge_grant(&mut self.permissions, &pattern.into(), verbs);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Add `verbs` under the canonical key of `pattern`, keeping verbs already granted
fn merge_grant(permissions: &mut BTreeMap<String, Vec<Verb>>, pattern: &str, verbs: &[Verb]) {
    let granted = permissions.entry(normalize_pattern(pattern)).or_default();
    for verb in verbs {
        if !granted.contains(verb) {
            granted.push(*verb);
        }
    }
}

/// A role with its grants compiled for matching
#[derive(Debug, Clone)]
pub struct Role {
    id: String,
    record: RoleRecord,
    matcher: PermissionMatcher,
}

impl Role {
    /// Compile a role. A missing id is replaced with a generated opaque token.
    pub fn new(mut record: RoleRecord) -> Self {
        let id = record
            .id
            .get_or_insert_with(|| uuid::Uuid::new_v4().simple().to_string())
            .clone();

        for (pattern, verbs) in std::mem::take(&mut record.permissions) {
            merge_grant(&mut record.permissions, &pattern, &verbs);
        }

        let mut matcher = PermissionMatcher::new();
        for (pattern, verbs) in &record.permissions {
            matcher.insert(pattern, verbs);
        }

        Role {
            id,
            record,
            matcher,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn permissions(&self) -> &BTreeMap<String, Vec<Verb>> {
        &self.record.permissions
    }

    pub fn meta(&self) -> &BTreeMap<String, MetaValue> {
        &self.record.meta
    }

    /// Grant `verbs` on `pattern`, replacing any previous grant for it
    pub fn add_permission(&mut self, pattern: &str, verbs: &[Verb]) {
        self.matcher.insert(pattern, verbs);
        self.record
            .permissions
            .insert(normalize_pattern(pattern), verbs.to_vec());
    }

    /// Withdraw the grant on `pattern`
    pub fn remove_permission(&mut self, pattern: &str) {
        self.matcher.remove(pattern);
        self.record.permissions.remove(&normalize_pattern(pattern));
    }

    /// Check if the role grants `verb` on `permission_id`
    pub fn matches_permission(&self, permission_id: &str, verb: Verb) -> bool {
        self.matcher.matches(permission_id, verb)
    }

    pub fn add_meta(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) {
        self.record.meta.insert(key.into(), value.into());
    }

    pub fn remove_meta(&mut self, key: &str) {
        self.record.meta.remove(key);
    }

    /// Copy of the persisted shape. Matcher state is derived and never persisted.
    pub fn to_record(&self) -> RoleRecord {
        self.record.clone()
    }
}

impl From<RoleRecord> for Role {
    fn from(record: RoleRecord) -> Self {
        Role::new(record)
    }
}
