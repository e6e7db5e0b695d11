//! Host-side view of dispatchable actions and requests

use crate::core::policy::Verb;
use std::sync::{Arc, OnceLock};

/// RBAC annotation carried by an action that opts into authorization
#[derive(Debug, Default)]
pub struct RbacDescriptor {
    /// Human readable permission name
    pub name: String,
    /// Verbs the registered permission declares. Stored as given, including an empty list.
    pub action_type: Vec<Verb>,
    /// Overrides the action name as the permission value
    pub action_name: Option<String>,
    pub deprecated: bool,
    id: OnceLock<String>,
}

impl RbacDescriptor {
    pub fn new(name: impl Into<String>, action_type: &[Verb]) -> Self {
        RbacDescriptor {
            name: name.into(),
            action_type: action_type.to_vec(),
            ..Default::default()
        }
    }

    pub fn with_action_name(mut self, action_name: impl Into<String>) -> Self {
        self.action_name = Some(action_name.into());
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Permission id resolved at registration, `None` until then
    pub fn id(&self) -> Option<&str> {
        self.id.get().map(String::as_str)
    }

    /// Record the resolved permission id. The first write wins.
    pub(crate) fn resolve(&self, id: String) {
        let _ = self.id.set(id);
    }
}

/// An action the host can dispatch
#[derive(Debug)]
pub struct ServiceAction {
    pub action_name: String,
    pub rbac: Option<RbacDescriptor>,
}

impl ServiceAction {
    /// Action exempt from authorization
    pub fn new(action_name: impl Into<String>) -> Self {
        ServiceAction {
            action_name: action_name.into(),
            rbac: None,
        }
    }

    pub fn with_rbac(mut self, rbac: RbacDescriptor) -> Self {
        self.rbac = Some(rbac);
        self
    }

    /// Value the permission id is derived from
    pub fn permission_value(&self) -> Option<&str> {
        let rbac = self.rbac.as_ref()?;
        Some(rbac.action_name.as_deref().unwrap_or(&self.action_name))
    }

    pub fn permission_id(&self) -> Option<&str> {
        self.rbac.as_ref().and_then(RbacDescriptor::id)
    }
}

/// Enumerates the host's dispatchable actions
pub trait ActionSource: Send + Sync {
    fn actions(&self) -> Vec<Arc<ServiceAction>>;
}

impl ActionSource for Vec<Arc<ServiceAction>> {
    fn actions(&self) -> Vec<Arc<ServiceAction>> {
        self.clone()
    }
}

/// Authenticated caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub roles: Vec<String>,
}

impl AuthContext {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AuthContext {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

/// A dispatched request as seen by the authorization hook
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub action: Arc<ServiceAction>,
    pub auth: Option<AuthContext>,
    pub verb: Verb,
}

impl ServiceRequest {
    pub fn new(action: Arc<ServiceAction>) -> Self {
        ServiceRequest {
            action,
            auth: None,
            verb: Verb::default(),
        }
    }

    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_verb(mut self, verb: Verb) -> Self {
        self.verb = verb;
        self
    }
}
