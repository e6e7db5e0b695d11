//! Permission records
//!
//! A permission is the registrable identity of one service action. Its id is
//! derived from the owning service name and the action value and never changes
//! across re-registration.

use crate::core::validation::{parse_version, permission_id};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Action-type token gating what a grant permits
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    #[default]
    Get,
    Post,
    Patch,
    Delete,
}

impl Verb {
    /// Every verb, in declaration order
    pub const ALL: [Verb; 4] = [Verb::Get, Verb::Post, Verb::Patch, Verb::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = crate::error::RbacError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "GET" => Ok(Verb::Get),
            "POST" => Ok(Verb::Post),
            "PATCH" => Ok(Verb::Patch),
            "DELETE" => Ok(Verb::Delete),
            other => Err(crate::error::RbacError::InvalidFormat(format!(
                "unknown verb '{}'",
                other
            ))),
        }
    }
}

/// Parameters for registering a permission on behalf of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRegistration {
    pub service_name: String,
    pub value: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<Vec<Verb>>,
    #[serde(default)]
    pub reserved: bool,
}

/// Persisted permission record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub reserved: bool,
    #[serde(default = "all_verbs")]
    pub action_type: Vec<Verb>,
}

fn all_verbs() -> Vec<Verb> {
    Verb::ALL.to_vec()
}

impl Permission {
    /// Build a canonical permission record from registration parameters
    ///
    /// # Errors
    ///
    /// Returns `NotSemver` if the version is not valid semver.
    ///
    /// # Examples
    ///
    /// ```
    /// use fleet_rbac::{Permission, PermissionRegistration, Verb};
    ///
    /// let permission = Permission::prepare(PermissionRegistration {
    ///     service_name: "users".to_string(),
    ///     value: "profile.read".to_string(),
    ///     name: "Read profile".to_string(),
    ///     version: "1.0.0".to_string(),
    ///     deprecated: false,
    ///     action_type: None,
    ///     reserved: false,
    /// }).unwrap();
    ///
    /// assert_eq!(permission.id, "users/profile/read");
    /// assert_eq!(permission.action_type, Verb::ALL.to_vec());
    /// ```
    pub fn prepare(params: PermissionRegistration) -> Result<Self> {
        let permission = Permission {
            id: permission_id(&params.service_name, &params.value),
            name: params.name,
            version: params.version,
            deprecated: params.deprecated,
            reserved: params.reserved,
            action_type: params.action_type.unwrap_or_else(all_verbs),
        };
        permission.validate()?;
        Ok(permission)
    }

    /// Check the version is valid semver
    pub fn validate(&self) -> Result<()> {
        parse_version(&self.version)?;
        Ok(())
    }

    pub fn verbs(&self) -> &[Verb] {
        &self.action_type
    }
}
