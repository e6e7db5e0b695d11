//! Agent end-to-end tests
//!
//! Registration, polled role snapshots, decisions and shutdown against the
//! in-process backend and a remote backend served over the local bus.

use async_trait::async_trait;
use fleet_rbac::{
    default_roles, seed_roles, serve_storage, Agent, AgentConfig, AgentState, AuthContext,
    ListFilter, LocalBus, MemoryStorage, Page, Permission, PolicyCore, RbacDescriptor, RbacError,
    Result, RoleRecord, RoutingTable, ServiceAction, ServiceRequest, Storage, StorageConfig, Verb,
    DEFAULT_INTERNAL_ROLES,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const SERVICE: &str = "rbac-agent-test";

/// Set RUST_LOG=fleet_rbac=debug to see agent logs
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn sample() -> Arc<ServiceAction> {
    Arc::new(ServiceAction::new("sample").with_rbac(RbacDescriptor::new("Echo Request", &[Verb::Get])))
}

fn memory_agent(actions: Vec<Arc<ServiceAction>>) -> Arc<Agent> {
    Agent::builder(AgentConfig::new(SERVICE).with_version("1.3.0"))
        .actions(Arc::new(actions))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_sample_action_is_registered() {
    init_tracing();
    let action = sample();
    let agent = memory_agent(vec![action.clone(), Arc::new(ServiceAction::new("health"))]);
    agent.init().await.unwrap();

    let page = agent.core().permission.list(&ListFilter::default()).await.unwrap();
    assert_eq!(page.cursor, "");
    assert_eq!(page.data.len(), 1);

    let permission = &page.data[0];
    assert_eq!(permission.id, format!("{}/sample", SERVICE));
    assert_eq!(permission.verbs(), &[Verb::Get]);
    assert_eq!(permission.version, "1.3.0");
    assert_eq!(action.permission_id(), Some(permission.id.as_str()));

    agent.close();
}

#[tokio::test]
async fn test_role_changes_apply_after_sync() {
    let action = sample();
    let agent = memory_agent(vec![action.clone()]);
    agent.init().await.unwrap();

    let viewer = agent
        .core()
        .role
        .create(RoleRecord::new("Viewer").grant("*", &[Verb::Get]))
        .await
        .unwrap();
    assert!(!viewer.id().is_empty());
    let roles = [viewer.id().to_string()];

    agent.sync_roles().await.unwrap();
    assert!(agent.matches(&roles, &action));

    agent
        .core()
        .role
        .update(viewer.id(), json!({ "permissions": { "*": [] } }))
        .await
        .unwrap();
    assert!(agent.matches(&roles, &action), "stale until the next sync");

    agent.sync_roles().await.unwrap();
    assert!(!agent.matches(&roles, &action));

    agent
        .core()
        .role
        .update(viewer.id(), json!({ "permissions": { "*": ["GET"] } }))
        .await
        .unwrap();
    agent.sync_roles().await.unwrap();
    assert!(agent.matches(&["does-not-exist".to_string(), viewer.id().to_string()], &action));

    agent.core().role.remove(viewer.id()).await.unwrap();
    agent.sync_roles().await.unwrap();
    assert_eq!(agent.role_count(), 0);
    assert!(!agent.matches(&roles, &action));

    agent.close();
}

#[tokio::test]
async fn test_unregistered_action_never_matches() {
    let registered = sample();
    let agent = memory_agent(vec![registered]);
    agent
        .core()
        .role
        .create(RoleRecord::new("Admin").with_id("admin").grant("*", &Verb::ALL))
        .await
        .unwrap();
    agent.init().await.unwrap();

    let unknown = sample();
    assert!(!agent.matches(&["admin"], &unknown));
    assert!(!agent.matches(&["admin"], &ServiceAction::new("health")));

    agent.close();
}

#[tokio::test]
async fn test_resync_timer_picks_up_new_roles() {
    init_tracing();
    let agent = Agent::builder(
        AgentConfig::new(SERVICE).with_sync(Duration::from_millis(20), 1.5),
    )
    .actions(Arc::new(vec![sample()]))
    .build()
    .unwrap();
    agent.init().await.unwrap();
    assert_eq!(agent.role_count(), 0);

    agent
        .core()
        .role
        .create(RoleRecord::new("Viewer").grant("*", &[Verb::Get]))
        .await
        .unwrap();

    let mut synced = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if agent.role_count() == 1 {
            synced = true;
            break;
        }
    }
    assert!(synced, "timer never resynced");

    agent.close();
    agent
        .core()
        .role
        .create(RoleRecord::new("Editor").grant("*", &[Verb::Post]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(agent.role_count(), 1);
    assert_eq!(agent.state(), AgentState::Closed);
}

#[tokio::test]
async fn test_dropping_agent_stops_timer() {
    let agent = Agent::builder(
        AgentConfig::new(SERVICE).with_sync(Duration::from_millis(10), 1.0),
    )
    .actions(Arc::new(vec![sample()]))
    .build()
    .unwrap();
    agent.init().await.unwrap();

    let weak = Arc::downgrade(&agent);
    drop(agent);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(weak.upgrade().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_matches_during_resync() {
    let action = sample();
    let agent = memory_agent(vec![action.clone()]);
    for i in 0..40 {
        agent
            .core()
            .role
            .create(
                RoleRecord::new(format!("Role {}", i))
                    .with_id(format!("role-{:02}", i))
                    .grant("*", &[Verb::Get]),
            )
            .await
            .unwrap();
    }
    agent.init().await.unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let agent = agent.clone();
            let action = action.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    assert!(agent.matches(&["role-39"], &action));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for _ in 0..10 {
        agent.sync_roles().await.unwrap();
        assert_eq!(agent.role_count(), 40);
    }

    for reader in readers {
        reader.await.unwrap();
    }
    agent.close();
}

#[tokio::test]
async fn test_verify_request_with_remote_backend() {
    init_tracing();
    let bus = LocalBus::new();
    serve_storage::<RoleRecord>(
        &bus,
        "rbac.roles",
        &RoutingTable::roles(),
        Arc::new(MemoryStorage::<RoleRecord>::new()),
    )
    .unwrap();
    serve_storage::<Permission>(
        &bus,
        "rbac.permissions",
        &RoutingTable::permissions(),
        Arc::new(MemoryStorage::<Permission>::new()),
    )
    .unwrap();

    let config = AgentConfig::new(SERVICE).with_storage(StorageConfig::Remote {
        role_service: "rbac.roles".to_string(),
        permission_service: "rbac.permissions".to_string(),
        timeout_ms: 1_000,
        role_routes: Default::default(),
        permission_routes: Default::default(),
    });

    let read = sample();
    let delete = Arc::new(
        ServiceAction::new("purge").with_rbac(RbacDescriptor::new("Purge", &[Verb::Delete])),
    );
    let open = Arc::new(ServiceAction::new("health"));
    let agent = Agent::builder(config)
        .actions(Arc::new(vec![read.clone(), delete.clone(), open.clone()]))
        .bus(Arc::new(bus))
        .build()
        .unwrap();

    assert_eq!(seed_roles(&agent.core().role, default_roles()).await.unwrap(), 4);
    agent.init().await.unwrap();
    assert_eq!(agent.state(), AgentState::Ready);
    assert_eq!(agent.role_count(), 4);
    assert_eq!(
        agent.core().permission.read(&format!("{}/purge", SERVICE)).await.unwrap().action_type,
        vec![Verb::Delete]
    );

    let internal = AuthContext::new(DEFAULT_INTERNAL_ROLES);
    let janitor = AuthContext::new(["system.janitor"]);

    assert!(agent
        .verify_request(&ServiceRequest::new(read.clone()).with_auth(internal.clone()))
        .is_ok());
    assert!(matches!(
        agent.verify_request(
            &ServiceRequest::new(delete.clone())
                .with_auth(internal)
                .with_verb(Verb::Delete)
        ),
        Err(RbacError::AccessDenied)
    ));
    assert!(agent
        .verify_request(
            &ServiceRequest::new(delete)
                .with_auth(janitor.clone())
                .with_verb(Verb::Delete)
        )
        .is_ok());
    assert!(agent.verify_request(&ServiceRequest::new(open)).is_ok());
    assert!(matches!(
        agent.verify_request(&ServiceRequest::new(read)),
        Err(RbacError::AccessDenied)
    ));

    agent.close();
}

#[tokio::test]
async fn test_init_fails_when_backend_unreachable() {
    let config = AgentConfig::new(SERVICE).with_storage(StorageConfig::Remote {
        role_service: "rbac.roles".to_string(),
        permission_service: "rbac.permissions".to_string(),
        timeout_ms: 200,
        role_routes: Default::default(),
        permission_routes: Default::default(),
    });

    let agent = Agent::builder(config)
        .actions(Arc::new(vec![sample()]))
        .bus(Arc::new(LocalBus::new()))
        .build()
        .unwrap();

    let err = agent.init().await.unwrap_err();
    assert!(err.is_unavailable());
    assert_eq!(agent.state(), AgentState::Uninitialized);
    agent.close();
}

/// Permission store that rejects writes to ids ending in `/broken`
struct RejectingPermissions {
    inner: MemoryStorage<Permission>,
}

#[async_trait]
impl Storage<Permission> for RejectingPermissions {
    async fn exists(&self, id: &str) -> Result<bool> {
        self.inner.exists(id).await
    }

    async fn read(&self, id: &str) -> Result<Permission> {
        self.inner.read(id).await
    }

    async fn create(&self, id: &str, datum: Permission) -> Result<Permission> {
        self.inner.create(id, datum).await
    }

    async fn update(&self, id: &str, partial: Value) -> Result<Permission> {
        self.inner.update(id, partial).await
    }

    async fn patch(&self, id: &str, datum: Value) -> Result<Permission> {
        if id.ends_with("/broken") {
            return Err(RbacError::InvalidFormat(format!("rejected {}", id)));
        }
        self.inner.patch(id, datum).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.inner.remove(id).await
    }

    async fn list(&self, filter: &ListFilter) -> Result<Page<Permission>> {
        self.inner.list(filter).await
    }
}

#[tokio::test]
async fn test_failed_registration_does_not_abort_init() {
    init_tracing();
    let core = PolicyCore::new(
        Arc::new(RejectingPermissions {
            inner: MemoryStorage::new(),
        }),
        Arc::new(MemoryStorage::<RoleRecord>::new()),
    );

    let good = sample();
    let broken = Arc::new(
        ServiceAction::new("broken").with_rbac(RbacDescriptor::new("Broken", &[Verb::Get])),
    );
    let agent = Agent::builder(AgentConfig::new(SERVICE))
        .actions(Arc::new(vec![good.clone(), broken.clone()]))
        .core(core)
        .build()
        .unwrap();

    agent.init().await.unwrap();
    assert_eq!(agent.state(), AgentState::Ready);
    assert_eq!(good.permission_id(), Some("rbac-agent-test/sample"));
    assert_eq!(broken.permission_id(), None);

    let page = agent.core().permission.list(&ListFilter::default()).await.unwrap();
    assert_eq!(page.data.len(), 1);

    agent.close();
}

#[tokio::test]
async fn test_empty_action_type_is_stored_as_given() {
    let action = Arc::new(
        ServiceAction::new("notify").with_rbac(RbacDescriptor::new("Notify", &[])),
    );
    let agent = memory_agent(vec![action.clone()]);
    agent.init().await.unwrap();

    let id = action.permission_id().unwrap().to_string();
    let permission = agent.core().permission.read(&id).await.unwrap();
    assert!(permission.action_type.is_empty());
    assert!(permission.verbs().is_empty());

    agent.close();
}
