//! Validation for permission versions and identifiers
//!
//! Permission ids share one segment structure with role grant patterns:
//! `service/segment/segment`, where dots in an action name become slashes.

use crate::error::{RbacError, Result};
use semver::Version;
use std::cmp::Ordering;

/// Parse a semver version, failing with `NotSemver`
///
/// # Examples
///
/// ```
/// use fleet_rbac::validation::parse_version;
///
/// assert!(parse_version("1.2.3").is_ok());
/// assert!(parse_version("1.2").is_err());
/// ```
pub fn parse_version(version: &str) -> Result<Version> {
    Version::parse(version).map_err(|_| RbacError::NotSemver(version.to_string()))
}

/// Compare two semver strings by precedence. Build metadata is ignored.
/// Returns `None` if either side is not valid semver.
pub fn compare_versions(left: &str, right: &str) -> Option<Ordering> {
    let left = Version::parse(left).ok()?;
    let right = Version::parse(right).ok()?;
    Some(left.cmp_precedence(&right))
}

/// Derive a permission id from the owning service and the action value
///
/// # Examples
///
/// ```
/// use fleet_rbac::validation::permission_id;
///
/// assert_eq!(permission_id("users", "roles.read"), "users/roles/read");
/// ```
pub fn permission_id(service_name: &str, value: &str) -> String {
    format!("{}/{}", service_name, value.replace('.', "/"))
}

/// Canonical form of a grant pattern: dots become slashes
pub fn normalize_pattern(pattern: &str) -> String {
    pattern.replace('.', "/")
}

/// Split an id or pattern into segments. Dots count as separators.
///
/// Empty segments are kept, so `svc/a/` and `svc/a` stay distinct.
pub fn segments(path: &str) -> Vec<String> {
    normalize_pattern(path).split('/').map(str::to_string).collect()
}
