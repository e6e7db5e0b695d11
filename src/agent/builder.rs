use super::{ActionSource, Agent};
use crate::config::{routing_with_overrides, AgentConfig, StorageConfig};
use crate::core::policy::{Permission, RoleRecord};
use crate::core::storage::{
    KvClient, KvStorage, MemoryStorage, MessageBus, RemoteStorage, RoutingTable,
};
use crate::core::PolicyCore;
use crate::error::{RbacError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Assembles an [`Agent`] and the storages its configured backend needs
///
/// ```
/// use fleet_rbac::{AgentBuilder, AgentConfig, ServiceAction, RbacDescriptor, Verb};
/// use std::sync::Arc;
///
/// let actions = vec![Arc::new(
///     ServiceAction::new("sample").with_rbac(RbacDescriptor::new("Sample", &[Verb::Get])),
/// )];
/// let agent = AgentBuilder::new(AgentConfig::new("users"))
///     .actions(Arc::new(actions))
///     .build()
///     .unwrap();
/// assert_eq!(agent.role_count(), 0);
/// ```
pub struct AgentBuilder {
    config: AgentConfig,
    actions: Option<Arc<dyn ActionSource>>,
    kv: Option<Arc<dyn KvClient>>,
    bus: Option<Arc<dyn MessageBus>>,
    core: Option<PolicyCore>,
}

impl AgentBuilder {
    pub fn new(config: AgentConfig) -> Self {
        AgentBuilder {
            config,
            actions: None,
            kv: None,
            bus: None,
            core: None,
        }
    }

    pub fn actions(mut self, actions: Arc<dyn ActionSource>) -> Self {
        self.actions = Some(actions);
        self
    }

    /// Client for the `kv` backend
    pub fn kv_client(mut self, client: Arc<dyn KvClient>) -> Self {
        self.kv = Some(client);
        self
    }

    /// Transport for the `remote` backend
    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Use existing storages instead of the configured backend
    pub fn core(mut self, core: PolicyCore) -> Self {
        self.core = Some(core);
        self
    }

    pub fn build(self) -> Result<Arc<Agent>> {
        let actions = self
            .actions
            .clone()
            .ok_or_else(|| RbacError::Misconfiguration("an action source is required".into()))?;

        let core = match self.core.clone() {
            Some(core) => core,
            None => self.backend()?,
        };

        Agent::new(self.config, core, actions)
    }

    fn backend(&self) -> Result<PolicyCore> {
        match &self.config.storage {
            StorageConfig::Memory => Ok(PolicyCore::new(
                Arc::new(MemoryStorage::<Permission>::new()),
                Arc::new(MemoryStorage::<RoleRecord>::new()),
            )),
            StorageConfig::Kv {
                role_db,
                permission_db,
            } => {
                let client = self.kv.clone().ok_or_else(|| {
                    RbacError::Misconfiguration("kv backend requires a kv client".into())
                })?;
                Ok(PolicyCore::new(
                    Arc::new(KvStorage::<Permission, _>::new(client.clone(), permission_db.as_str())),
                    Arc::new(KvStorage::<RoleRecord, _>::new(client, role_db.as_str())),
                ))
            }
            StorageConfig::Remote {
                role_service,
                permission_service,
                timeout_ms,
                role_routes,
                permission_routes,
            } => {
                let bus = self.bus.clone().ok_or_else(|| {
                    RbacError::Misconfiguration("remote backend requires a message bus".into())
                })?;
                let timeout = Duration::from_millis(*timeout_ms);
                let permissions = RemoteStorage::<Permission, _>::new(
                    bus.clone(),
                    permission_service.as_str(),
                    routing_with_overrides(RoutingTable::permissions(), permission_routes)?,
                )
                .with_timeout(timeout);
                let roles = RemoteStorage::<RoleRecord, _>::new(
                    bus,
                    role_service.as_str(),
                    routing_with_overrides(RoutingTable::roles(), role_routes)?,
                )
                .with_timeout(timeout);
                Ok(PolicyCore::new(Arc::new(permissions), Arc::new(roles)))
            }
        }
    }
}
