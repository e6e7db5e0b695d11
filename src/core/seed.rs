//! Reserved system roles created when a policy service starts

use super::api::RoleApi;
use super::policy::{RoleRecord, Verb};
use crate::error::{RbacError, Result};
use tracing::{debug, info};

/// Roles assigned to requests arriving over trusted internal transports
pub const DEFAULT_INTERNAL_ROLES: [&str; 2] = ["system.viewer", "system.editor"];

/// Read, write, delete, and full access across every namespace
pub fn default_roles() -> Vec<RoleRecord> {
    vec![
        RoleRecord::new("System Viewer")
            .with_id("system.viewer")
            .with_description("Grants Read Access on All Resources in the system")
            .grant("*", &[Verb::Get])
            .with_meta("reserved", true),
        RoleRecord::new("System Editor")
            .with_id("system.editor")
            .with_description("Grants Write/Update Access on All Resources in the system")
            .grant("*", &[Verb::Patch, Verb::Post])
            .with_meta("reserved", true),
        RoleRecord::new("System Janitor")
            .with_id("system.janitor")
            .with_description("Grants Delete Access on All Resources in the system")
            .grant("*", &[Verb::Delete])
            .with_meta("reserved", true),
        RoleRecord::new("System Admin")
            .with_id("system.admin")
            .with_description("Grants Full Access on All Resources in the system")
            .grant("*", &Verb::ALL)
            .with_meta("reserved", true),
    ]
}

/// Create `roles`, leaving any that already exist untouched
///
/// Returns the number of roles actually created.
pub async fn seed_roles(api: &RoleApi, roles: Vec<RoleRecord>) -> Result<usize> {
    let mut created = 0;
    for record in roles {
        let id = record.id.clone().unwrap_or_default();
        match api.create(record).await {
            Ok(_) => created += 1,
            Err(RbacError::Conflict(_)) => debug!("Role {} already seeded", id),
            Err(err) => return Err(err),
        }
    }
    info!("Seeded {} roles", created);
    Ok(created)
}
