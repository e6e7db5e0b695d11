use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RbacError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("resource already exists: {0}")]
    Conflict(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("\"version\" must adhere to semver: {0}")]
    NotSemver(String),

    /// Offered version is older than the stored one. The stored record is untouched.
    #[error("version too low for {id}: stored {stored}, offered {offered}")]
    VersionLow {
        id: String,
        stored: String,
        offered: String,
    },

    #[error("[rbac] access denied")]
    AccessDenied,

    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

impl RbacError {
    /// Soft errors are expected steady-state outcomes, not failures.
    pub fn is_soft(&self) -> bool {
        matches!(self, RbacError::VersionLow { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, RbacError::Unavailable(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RbacError::NotFound(_) => ErrorKind::NotFound,
            RbacError::Conflict(_) => ErrorKind::Conflict,
            RbacError::InvalidFormat(_) | RbacError::Serialization(_) => ErrorKind::InvalidFormat,
            RbacError::NotSemver(_) => ErrorKind::NotSemver,
            RbacError::VersionLow { .. } => ErrorKind::VersionLow,
            RbacError::AccessDenied => ErrorKind::AccessDenied,
            RbacError::Misconfiguration(_) | RbacError::Config(_) | RbacError::Validation(_) => {
                ErrorKind::Misconfiguration
            }
            RbacError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }
}

/// Wire-stable error classification, used to carry errors across the message bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidFormat,
    NotSemver,
    VersionLow,
    AccessDenied,
    Misconfiguration,
    Unavailable,
}

/// Serialized form of an [`RbacError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl From<&RbacError> for WireError {
    fn from(err: &RbacError) -> Self {
        let id = match err {
            RbacError::NotFound(id) | RbacError::Conflict(id) => Some(id.clone()),
            RbacError::VersionLow { id, .. } => Some(id.clone()),
            _ => None,
        };
        // The receiving side adds its own prefix, so only the reason travels.
        let message = match err {
            RbacError::InvalidFormat(reason)
            | RbacError::NotSemver(reason)
            | RbacError::Misconfiguration(reason)
            | RbacError::Unavailable(reason)
            | RbacError::Validation(reason) => reason.clone(),
            RbacError::Serialization(source) => source.to_string(),
            RbacError::Config(source) => source.to_string(),
            _ => err.to_string(),
        };
        WireError {
            kind: err.kind(),
            message,
            id,
        }
    }
}

impl From<WireError> for RbacError {
    fn from(wire: WireError) -> Self {
        let id = wire.id.unwrap_or_default();
        match wire.kind {
            ErrorKind::NotFound => RbacError::NotFound(id),
            ErrorKind::Conflict => RbacError::Conflict(id),
            ErrorKind::InvalidFormat => RbacError::InvalidFormat(wire.message),
            ErrorKind::NotSemver => RbacError::NotSemver(wire.message),
            // Versions are not carried on the wire, only the fact of the rejection.
            ErrorKind::VersionLow => RbacError::VersionLow {
                id,
                stored: String::new(),
                offered: String::new(),
            },
            ErrorKind::AccessDenied => RbacError::AccessDenied,
            ErrorKind::Misconfiguration => RbacError::Misconfiguration(wire.message),
            ErrorKind::Unavailable => RbacError::Unavailable(wire.message),
        }
    }
}

pub type Result<T> = std::result::Result<T, RbacError>;
