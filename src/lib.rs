//! # Fleet RBAC - Role-Based Access Control for Service Fleets
//!
//! `fleet-rbac` decides whether a caller holding a set of roles may invoke a
//! service action. It provides:
//!
//! - **Permissions** derived from service actions, upserted with semver gating
//! - **Roles** granting verbs on wildcard permission patterns
//! - **Storage** behind one versioned contract: in-process, key-value, or remote over a message bus
//! - **Agent** embedded in each service: registers actions, polls roles, answers decisions locally
//!
//! ## Quick Start
//!
//! ```rust
//! use fleet_rbac::{Agent, AgentConfig, AuthContext, RbacDescriptor, RoleRecord, ServiceAction,
//!     ServiceRequest, Verb, Result};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! let sample = Arc::new(
//!     ServiceAction::new("sample").with_rbac(RbacDescriptor::new("Echo Request", &[Verb::Get])),
//! );
//! let agent = Agent::builder(AgentConfig::new("svcA").with_version("1.0.0"))
//!     .actions(Arc::new(vec![sample.clone()]))
//!     .build()?;
//!
//! agent
//!     .core()
//!     .role
//!     .create(RoleRecord::new("Viewer").with_id("viewer").grant("*", &[Verb::Get]))
//!     .await?;
//! agent.init().await?;
//!
//! let request = ServiceRequest::new(sample).with_auth(AuthContext::new(["viewer"]));
//! agent.verify_request(&request)?;
//!
//! agent.close();
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod core;
pub mod error;

pub use crate::core::validation;

pub use crate::agent::{
    ActionSource, Agent, AgentBuilder, AgentState, AuthContext, RbacDescriptor, RoleSnapshot,
    ServiceAction, ServiceRequest,
};
pub use crate::config::{AgentConfig, StorageConfig, SyncConfig};
pub use crate::core::policy::{
    MetaValue, Permission, PermissionMatcher, PermissionRegistration, Role, RoleRecord, Verb,
};
pub use crate::core::seed::{default_roles, seed_roles, DEFAULT_INTERNAL_ROLES};
pub use crate::core::storage::{
    serve_storage, KvClient, KvStorage, ListFilter, LocalBus, MemoryKv, MemoryStorage, MessageBus,
    Operation, Page, RemoteRequest, RemoteResponse, RemoteStorage, RequestHandler, RoutingTable,
    Storage, StorageResponder, DEFAULT_LIMIT,
};
#[cfg(feature = "redis")]
pub use crate::core::storage::RedisKv;
pub use crate::core::{PermissionApi, PolicyCore, RoleApi};
pub use crate::error::{ErrorKind, RbacError, Result, WireError};
