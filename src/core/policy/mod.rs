//! Permission and role models
//!
//! Provides the authorization data model with:
//! - Versioned permission records with ids derived from the owning service
//! - Roles granting verbs on permission-id patterns
//! - A segment trie compiled from each role's grants

mod matcher;
mod permission;
mod role;

pub use matcher::PermissionMatcher;
pub use permission::{Permission, PermissionRegistration, Verb};
pub use role::{MetaValue, Role, RoleRecord};
