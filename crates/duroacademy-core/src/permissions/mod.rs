//! Screen-level access control for the admin dashboard.
//!
//! This module provides:
//! - `Screen`: the closed set of gated dashboard screens
//! - `StaticRolePermissions`: role defaults loaded from configuration
//! - `PermissionResolver`: merges role defaults with per-admin overrides
//! - `PermissionSession`: resolution state for the signed-in principal
//!
//! Super admins see everything. An admin's override row, when present,
//! replaces the static admin set outright. If the override cannot be fetched
//! the session is denied rather than falling back to the defaults.

pub mod resolver;
pub mod screen;
pub mod session;
pub mod set;

pub use resolver::{OverrideSource, PermissionError, PermissionResolver};
pub use screen::{Screen, UnknownScreen};
pub use session::{DenyReason, PermissionSession, ResolutionState};
pub use set::{has_access, PermissionOverride, PermissionSet, StaticRolePermissions};
