//! Agent configuration
//!
//! Parsed from TOML and validated before an agent is built:
//!
//! ```toml
//! service_name = "users"
//! service_version = "1.4.0"
//!
//! [sync]
//! interval_ms = 60000
//! jitter = 1.5
//!
//! [storage]
//! backend = "remote"
//! role_service = "rbac.roles"
//! permission_service = "rbac.permissions"
//! timeout_ms = 5000
//! ```

use crate::core::storage::{Operation, RoutingTable};
use crate::core::validation::parse_version;
use crate::error::{RbacError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::{Validate, ValidationError};

fn default_version() -> String {
    "0.0.0".to_string()
}

fn default_interval_ms() -> u64 {
    60_000
}

fn default_jitter() -> f64 {
    1.5
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn validate_semver(version: &str) -> std::result::Result<(), ValidationError> {
    parse_version(version)
        .map(|_| ())
        .map_err(|_| ValidationError::new("semver"))
}

/// Role polling schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SyncConfig {
    /// Base polling period
    #[serde(default = "default_interval_ms")]
    #[validate(range(min = 1))]
    pub interval_ms: u64,

    /// Upper bound of the polling period as a multiple of `interval_ms`
    #[serde(default = "default_jitter")]
    #[validate(range(min = 1.0))]
    pub jitter: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            interval_ms: default_interval_ms(),
            jitter: default_jitter(),
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Inclusive bounds of the jittered delay
    pub fn bounds(&self) -> (Duration, Duration) {
        let low = self.interval_ms;
        let high = ((low as f64) * self.jitter).round() as u64;
        (Duration::from_millis(low), Duration::from_millis(high.max(low)))
    }
}

/// Storage backend selection
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// In-process store, single process only
    #[default]
    Memory,

    /// Replicated key-value store. Each db name namespaces its keys.
    Kv {
        role_db: String,
        permission_db: String,
    },

    /// Delegate to the process owning the policy database
    Remote {
        role_service: String,
        permission_service: String,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        /// Overrides of the default role routes, operation -> route suffix
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        role_routes: BTreeMap<String, String>,
        /// Overrides of the default permission routes
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        permission_routes: BTreeMap<String, String>,
    },
}

/// Apply operation -> suffix overrides on top of `base`
pub(crate) fn routing_with_overrides(
    base: RoutingTable,
    overrides: &BTreeMap<String, String>,
) -> Result<RoutingTable> {
    let mut table = base;
    for (operation, suffix) in overrides {
        let operation: Operation = operation.parse()?;
        table = table.route(operation, suffix.clone());
    }
    Ok(table)
}

/// Configuration of one [`Agent`](crate::Agent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AgentConfig {
    /// Owning service; prefixes every registered permission id
    #[validate(length(min = 1))]
    pub service_name: String,

    /// Version stamped on registered permissions
    #[serde(default = "default_version")]
    #[validate(custom(function = "validate_semver"))]
    pub service_version: String,

    #[serde(default)]
    #[validate(nested)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl AgentConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        AgentConfig {
            service_name: service_name.into(),
            service_version: default_version(),
            sync: SyncConfig::default(),
            storage: StorageConfig::default(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_sync(mut self, interval: Duration, jitter: f64) -> Self {
        self.sync = SyncConfig {
            interval_ms: interval.as_millis() as u64,
            jitter,
        };
        self
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: AgentConfig = toml::from_str(source)?;
        config.check()?;
        Ok(config)
    }

    /// Run field validation
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|errors| RbacError::Validation(errors.to_string()))
    }
}
