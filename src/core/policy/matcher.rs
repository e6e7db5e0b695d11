//! Segment trie matching grant patterns against permission ids
//!
//! Patterns use the same segmentation as permission ids. Supported wildcard:
//! - `*` in the middle of a pattern matches exactly one segment (`svc/*/read`)
//! - `*` as the last segment matches one or more remaining segments, so `*`
//!   alone grants across every service namespace

use super::permission::Verb;
use crate::core::validation::segments;
use std::collections::{BTreeSet, HashMap};

const WILDCARD: &str = "*";

#[derive(Debug, Default, Clone)]
struct Node {
    literals: HashMap<String, Node>,
    wildcard: Option<Box<Node>>,
    /// Verbs granted by a pattern ending here. `None` means no pattern ends here.
    verbs: Option<BTreeSet<Verb>>,
}

impl Node {
    fn allows(&self, verb: Verb) -> bool {
        self.verbs.as_ref().map_or(false, |v| v.contains(&verb))
    }

    fn is_empty(&self) -> bool {
        self.verbs.is_none() && self.literals.is_empty() && self.wildcard.is_none()
    }

    fn find(&self, path: &[String], verb: Verb) -> bool {
        let Some((head, rest)) = path.split_first() else {
            return self.allows(verb);
        };

        if let Some(child) = self.literals.get(head) {
            if child.find(rest, verb) {
                return true;
            }
        }

        if let Some(wild) = &self.wildcard {
            // Trailing wildcard swallows the rest of the path
            if wild.allows(verb) || wild.find(rest, verb) {
                return true;
            }
        }

        false
    }

    fn insert(&mut self, path: &[String], verbs: BTreeSet<Verb>) {
        match path.split_first() {
            None => self.verbs = Some(verbs),
            Some((head, rest)) if head == WILDCARD => self
                .wildcard
                .get_or_insert_with(Box::default)
                .insert(rest, verbs),
            Some((head, rest)) => self
                .literals
                .entry(head.clone())
                .or_default()
                .insert(rest, verbs),
        }
    }

    fn remove(&mut self, path: &[String]) {
        match path.split_first() {
            None => self.verbs = None,
            Some((head, rest)) if head == WILDCARD => {
                if let Some(wild) = self.wildcard.as_mut() {
                    wild.remove(rest);
                    if wild.is_empty() {
                        self.wildcard = None;
                    }
                }
            }
            Some((head, rest)) => {
                if let Some(child) = self.literals.get_mut(head) {
                    child.remove(rest);
                    if child.is_empty() {
                        self.literals.remove(head);
                    }
                }
            }
        }
    }
}

/// Compiled grant patterns keyed by path segment and verb
#[derive(Debug, Default, Clone)]
pub struct PermissionMatcher {
    root: Node,
}

impl PermissionMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the verbs granted by `pattern`
    pub fn insert(&mut self, pattern: &str, verbs: &[Verb]) {
        self.root
            .insert(&segments(pattern), verbs.iter().copied().collect());
    }

    /// Drop `pattern` entirely
    pub fn remove(&mut self, pattern: &str) {
        self.root.remove(&segments(pattern));
    }

    /// Check if `permission_id` is granted for `verb`
    ///
    /// # Examples
    /// ```
    /// use fleet_rbac::{PermissionMatcher, Verb};
    ///
    /// let mut matcher = PermissionMatcher::new();
    /// matcher.insert("users/*/read", &[Verb::Get]);
    ///
    /// assert!(matcher.matches("users/profile/read", Verb::Get));
    /// assert!(!matcher.matches("users/profile/read", Verb::Post));
    /// assert!(!matcher.matches("users/profile/write", Verb::Get));
    /// ```
    pub fn matches(&self, permission_id: &str, verb: Verb) -> bool {
        self.root.find(&segments(permission_id), verb)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}
