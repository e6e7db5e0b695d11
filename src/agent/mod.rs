//! Per-service authorization agent
//!
//! An [`Agent`] registers the host's RBAC-annotated actions as permissions,
//! keeps a polled snapshot of every role, and answers authorization queries
//! from that snapshot without touching storage.
//!
//! Role changes become visible after the next sync tick. A role id that is not
//! in the snapshot never matches; it is not fetched on demand.

mod action;
mod builder;

pub use action::{ActionSource, AuthContext, RbacDescriptor, ServiceAction, ServiceRequest};
pub use builder::AgentBuilder;

use crate::config::AgentConfig;
use crate::core::policy::{PermissionRegistration, Role, Verb};
use crate::core::validation::permission_id;
use crate::core::PolicyCore;
use crate::error::{RbacError, Result};
use arc_swap::ArcSwap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Role id -> role
pub type RoleSnapshot = HashMap<String, Arc<Role>>;

/// Lifecycle of an [`Agent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Uninitialized,
    /// Registration and the first role sync are in flight
    Initializing,
    Ready,
    Closed,
}

struct Resync {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct Agent {
    config: AgentConfig,
    core: PolicyCore,
    actions: Arc<dyn ActionSource>,
    roles: ArcSwap<RoleSnapshot>,
    state: RwLock<AgentState>,
    resync: Mutex<Option<Resync>>,
    generation: AtomicU64,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        core: PolicyCore,
        actions: Arc<dyn ActionSource>,
    ) -> Result<Arc<Self>> {
        config.check()?;
        Ok(Arc::new(Agent {
            config,
            core,
            actions,
            roles: ArcSwap::from_pointee(RoleSnapshot::new()),
            state: RwLock::new(AgentState::Uninitialized),
            resync: Mutex::new(None),
            generation: AtomicU64::new(0),
        }))
    }

    pub fn builder(config: AgentConfig) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    pub fn state(&self) -> AgentState {
        *self.state.read()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Storage-backed APIs, for administration alongside the agent
    pub fn core(&self) -> &PolicyCore {
        &self.core
    }

    /// Number of roles in the current snapshot
    pub fn role_count(&self) -> usize {
        self.roles.load().len()
    }

    /// Register every action and load the first role snapshot, concurrently
    ///
    /// Failed registrations are logged and skipped, except `Unavailable`, which
    /// fails initialization along with any failure of the first sync.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != AgentState::Uninitialized {
                return Err(RbacError::Misconfiguration(format!(
                    "cannot initialize agent in state {:?}",
                    *state
                )));
            }
            *state = AgentState::Initializing;
        }

        let actions = self.actions.actions();
        let registrations = join_all(actions.iter().map(|action| self.register(action)));
        let (registered, synced) = tokio::join!(registrations, self.sync_roles());

        let mut outcome = synced.map(|_| ());
        let mut count = 0;
        for (action, result) in actions.iter().zip(registered) {
            match result {
                Ok(Some(_)) => count += 1,
                Ok(None) => {}
                Err(err) if err.is_unavailable() => {
                    if outcome.is_ok() {
                        outcome = Err(err);
                    }
                }
                Err(err) => warn!("Failed to register {}: {}", action.action_name, err),
            }
        }

        let mut state = self.state.write();
        if let Err(err) = outcome {
            if *state != AgentState::Closed {
                *state = AgentState::Uninitialized;
            }
            drop(state);
            self.cancel_resync();
            return Err(err);
        }

        if *state == AgentState::Initializing {
            *state = AgentState::Ready;
        }
        info!(
            "Agent for {} ready: {} permissions registered",
            self.config.service_name, count
        );
        Ok(())
    }

    /// Upsert the permission for `action` and record its id on the descriptor
    ///
    /// Returns `None` for actions without an RBAC descriptor. A stale version
    /// or an existing record is not an error.
    pub async fn register(&self, action: &ServiceAction) -> Result<Option<String>> {
        let (rbac, value) = match (action.rbac.as_ref(), action.permission_value()) {
            (Some(rbac), Some(value)) => (rbac, value),
            _ => return Ok(None),
        };

        let params = PermissionRegistration {
            service_name: self.config.service_name.clone(),
            value: value.to_string(),
            name: rbac.name.clone(),
            version: self.config.service_version.clone(),
            deprecated: rbac.deprecated,
            action_type: Some(rbac.action_type.clone()),
            reserved: false,
        };

        let id = match self.core.permission.register(params).await {
            Ok(permission) => permission.id,
            Err(err) if err.is_soft() || matches!(err, RbacError::Conflict(_)) => {
                debug!("Keeping stored permission for {}: {}", action.action_name, err);
                permission_id(&self.config.service_name, value)
            }
            Err(err) => return Err(err),
        };

        rbac.resolve(id.clone());
        Ok(Some(id))
    }

    /// Replace the role snapshot with every stored role and reschedule the next sync
    ///
    /// The next sync is scheduled whether or not this one succeeded.
    pub async fn sync_roles(self: &Arc<Self>) -> Result<usize> {
        let result = self.core.role.list_all("").await.map(|roles| {
            let snapshot: RoleSnapshot = roles
                .into_iter()
                .map(|role| (role.id().to_string(), Arc::new(role)))
                .collect();
            let count = snapshot.len();
            self.roles.store(Arc::new(snapshot));
            count
        });

        match &result {
            Ok(count) => debug!("Synced {} roles", count),
            Err(err) => warn!("Role sync failed: {}", err),
        }

        self.schedule_resync();
        result
    }

    fn next_delay(&self) -> Duration {
        let (low, high) = self.config.sync.bounds();
        let millis = rand::thread_rng().gen_range(low.as_millis() as u64..=high.as_millis() as u64);
        Duration::from_millis(millis)
    }

    fn schedule_resync(self: &Arc<Self>) {
        let mut slot = self.resync.lock();
        if self.state() == AgentState::Closed {
            return;
        }

        let delay = self.next_delay();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let agent = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(agent) = agent.upgrade() else {
                return;
            };

            {
                let mut slot = agent.resync.lock();
                match slot.as_ref() {
                    Some(current) if current.generation == generation => {
                        slot.take();
                    }
                    _ => return,
                }
            }

            let _ = agent.sync_roles().await;
        });

        if let Some(previous) = slot.replace(Resync { generation, handle }) {
            previous.handle.abort();
        }
        debug!("Next role sync in {:?}", delay);
    }

    fn cancel_resync(&self) {
        if let Some(resync) = self.resync.lock().take() {
            resync.handle.abort();
        }
    }

    /// Stop polling. The agent keeps answering from its last snapshot.
    pub fn close(&self) {
        *self.state.write() = AgentState::Closed;
        self.cancel_resync();
        info!("Agent for {} closed", self.config.service_name);
    }

    /// Whether any of `roles` grants `GET` on the action's permission
    pub fn matches<S: AsRef<str>>(&self, roles: &[S], action: &ServiceAction) -> bool {
        self.matches_with(roles, action, Verb::Get)
    }

    /// Whether any of `roles` grants `verb` on the action's permission
    ///
    /// False when the action has no resolved permission id, when `roles` is
    /// empty, or when no role in the snapshot matches.
    pub fn matches_with<S: AsRef<str>>(
        &self,
        roles: &[S],
        action: &ServiceAction,
        verb: Verb,
    ) -> bool {
        let Some(id) = action.permission_id() else {
            return false;
        };

        let snapshot = self.roles.load();
        roles
            .iter()
            .filter_map(|role| snapshot.get(role.as_ref()))
            .any(|role| role.matches_permission(id, verb))
    }

    /// Authorization hook for a dispatched request
    ///
    /// Actions without an RBAC descriptor pass unchecked.
    pub fn verify_request(&self, request: &ServiceRequest) -> Result<()> {
        if request.action.rbac.is_none() {
            return Ok(());
        }

        let roles = request
            .auth
            .as_ref()
            .map(|auth| auth.roles.as_slice())
            .unwrap_or(&[]);

        if self.matches_with(roles, &request.action, request.verb) {
            Ok(())
        } else {
            debug!(
                "Denied {} {} for roles {:?}",
                request.verb, request.action.action_name, roles
            );
            Err(RbacError::AccessDenied)
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        if let Some(resync) = self.resync.get_mut().take() {
            resync.handle.abort();
        }
    }
}
