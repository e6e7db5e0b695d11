//! Permission and role APIs over a pair of storages

use super::policy::{Permission, PermissionRegistration, Role, RoleRecord};
use super::storage::{ListFilter, Page, Storage};
use crate::error::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub type PermissionStorage = Arc<dyn Storage<Permission>>;
pub type RoleStorage = Arc<dyn Storage<RoleRecord>>;

/// Permission registry
#[derive(Clone)]
pub struct PermissionApi {
    storage: PermissionStorage,
}

impl PermissionApi {
    pub fn new(storage: PermissionStorage) -> Self {
        PermissionApi { storage }
    }

    pub async fn read(&self, id: &str) -> Result<Permission> {
        let permission = self.storage.read(id).await?;
        permission.validate()?;
        Ok(permission)
    }

    /// Upsert a permission, gated on its version
    ///
    /// Re-registering with the same or a higher version merges; a lower version
    /// fails with the soft `VersionLow` and leaves the stored record alone.
    pub async fn register(&self, params: PermissionRegistration) -> Result<Permission> {
        let permission = Permission::prepare(params)?;
        let datum = serde_json::to_value(&permission)?;
        let stored = self.storage.patch(&permission.id, datum).await?;
        debug!("Registered permission {} at {}", stored.id, stored.version);
        Ok(stored)
    }

    pub async fn unregister(&self, id: &str) -> Result<()> {
        self.storage.remove(id).await
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Page<Permission>> {
        self.storage.list(filter).await
    }
}

/// Role administration
#[derive(Clone)]
pub struct RoleApi {
    storage: RoleStorage,
}

impl RoleApi {
    pub fn new(storage: RoleStorage) -> Self {
        RoleApi { storage }
    }

    pub async fn read(&self, id: &str) -> Result<Role> {
        Ok(Role::new(self.storage.read(id).await?))
    }

    /// Store a new role. A missing id is generated.
    pub async fn create(&self, record: RoleRecord) -> Result<Role> {
        let role = Role::new(record);
        self.storage.create(role.id(), role.to_record()).await?;
        Ok(role)
    }

    /// Merge `partial` into the stored role. Verb lists in `partial` replace stored ones.
    pub async fn update(&self, id: &str, partial: Value) -> Result<Role> {
        Ok(Role::new(self.storage.update(id, partial).await?))
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.storage.remove(id).await
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Page<Role>> {
        Ok(self.storage.list(filter).await?.map(Role::new))
    }

    /// Walk every page under `prefix`
    pub async fn list_all(&self, prefix: &str) -> Result<Vec<Role>> {
        let mut roles = Vec::new();
        let mut filter = ListFilter::with_prefix(prefix);
        loop {
            let page = self.list(&filter).await?;
            let done = page.is_last();
            filter.cursor = Some(page.cursor);
            roles.extend(page.data);
            if done {
                return Ok(roles);
            }
        }
    }
}

/// Facade pairing the permission and role APIs
#[derive(Clone)]
pub struct PolicyCore {
    pub permission: PermissionApi,
    pub role: RoleApi,
}

impl PolicyCore {
    pub fn new(permissions: PermissionStorage, roles: RoleStorage) -> Self {
        PolicyCore {
            permission: PermissionApi::new(permissions),
            role: RoleApi::new(roles),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::Verb;
    use crate::core::storage::MemoryStorage;
    use crate::error::RbacError;
    use serde_json::json;

    fn core() -> PolicyCore {
        PolicyCore::new(
            Arc::new(MemoryStorage::<Permission>::new()),
            Arc::new(MemoryStorage::<RoleRecord>::new()),
        )
    }

    fn registration(version: &str) -> PermissionRegistration {
        PermissionRegistration {
            service_name: "svcA".to_string(),
            value: "sample".to_string(),
            name: "Sample".to_string(),
            version: version.to_string(),
            deprecated: false,
            action_type: Some(vec![Verb::Get]),
            reserved: false,
        }
    }

    #[tokio::test]
    async fn test_register_is_version_gated() {
        let core = core();
        let first = core.permission.register(registration("1.0.0")).await.unwrap();
        assert_eq!(first.id, "svcA/sample");

        let again = core.permission.register(registration("1.0.0")).await.unwrap();
        assert_eq!(again, first);

        let newer = core.permission.register(registration("1.1.0")).await.unwrap();
        assert_eq!(newer.version, "1.1.0");
        assert_eq!(newer.id, "svcA/sample");

        let older = core.permission.register(registration("0.1.0")).await.unwrap_err();
        assert!(older.is_soft());
        assert_eq!(core.permission.read("svcA/sample").await.unwrap().version, "1.1.0");
    }

    #[tokio::test]
    async fn test_register_rejects_non_semver() {
        let core = core();
        let err = core.permission.register(registration("one")).await.unwrap_err();
        assert!(matches!(err, RbacError::NotSemver(_)));
    }

    #[tokio::test]
    async fn test_unregister() {
        let core = core();
        core.permission.register(registration("1.0.0")).await.unwrap();
        core.permission.unregister("svcA/sample").await.unwrap();
        core.permission.unregister("svcA/sample").await.unwrap();
        assert!(matches!(
            core.permission.read("svcA/sample").await,
            Err(RbacError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_role_lifecycle() {
        let core = core();
        let created = core
            .role
            .create(RoleRecord::new("Viewer").grant("*", &[Verb::Get]))
            .await
            .unwrap();
        assert!(created.matches_permission("svcA/sample", Verb::Get));

        let updated = core
            .role
            .update(created.id(), json!({ "permissions": { "*": [] } }))
            .await
            .unwrap();
        assert!(!updated.matches_permission("svcA/sample", Verb::Get));
        assert_eq!(updated.id(), created.id());

        let err = core
            .role
            .create(RoleRecord::new("Viewer").with_id(created.id()))
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::Conflict(_)));

        core.role.remove(created.id()).await.unwrap();
        assert!(matches!(
            core.role.read(created.id()).await,
            Err(RbacError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_all_walks_pages() {
        let core = core();
        for i in 0..45 {
            core.role
                .create(RoleRecord::new(format!("r{}", i)).with_id(format!("role-{:02}", i)))
                .await
                .unwrap();
        }

        let roles = core.role.list_all("").await.unwrap();
        assert_eq!(roles.len(), 45);
        assert_eq!(roles[0].id(), "role-00");
        assert_eq!(roles[44].id(), "role-44");
    }
}
