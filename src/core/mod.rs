// Core policy engine

pub mod api;
pub mod policy;
pub mod seed;
pub mod storage;
pub mod validation;

pub use api::{PermissionApi, PolicyCore, RoleApi};
