use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::set::{PermissionOverride, PermissionSet, StaticRolePermissions};
use crate::api::ApiError;
use crate::models::{Principal, Role};

/// Where per-admin overrides come from.
///
/// `Ok(None)` must mean the store answered and there is no row. Anything
/// that prevented a definite answer is an `Err`.
#[async_trait]
pub trait OverrideSource: Send + Sync {
    async fn fetch_override(&self, user_id: &str) -> Result<Option<PermissionOverride>, ApiError>;
}

#[derive(Error, Debug)]
pub enum PermissionError {
    #[error("role {} may not use the admin dashboard", .0.as_str())]
    RoleNotPermitted(Role),

    #[error("could not load permission override: {0}")]
    OverrideFetch(#[source] ApiError),
}

/// Resolves a principal's screen access from static role defaults and the
/// remote override table.
#[derive(Clone)]
pub struct PermissionResolver {
    source: Arc<dyn OverrideSource>,
    statics: StaticRolePermissions,
}

impl PermissionResolver {
    pub fn new(source: Arc<dyn OverrideSource>, statics: StaticRolePermissions) -> Self {
        Self { source, statics }
    }

    /// Resolve the permission set for `principal`.
    ///
    /// Super admins always get [`PermissionSet::All`]. Admins get their
    /// override if one exists, otherwise the static admin set. A failed
    /// override fetch is an error and never falls back to the static set.
    pub async fn load_permissions(&self, principal: &Principal) -> Result<PermissionSet, PermissionError> {
        match principal.role {
            Role::SuperAdmin => Ok(PermissionSet::All),
            Role::Admin => {
                match self.source.fetch_override(&principal.id).await {
                    Ok(Some(row)) => {
                        debug!(user_id = %principal.id, screens = row.allowed_screens.len(), "Using permission override");
                        Ok(PermissionSet::Screens(row.allowed_screens))
                    }
                    Ok(None) => {
                        debug!(user_id = %principal.id, "No override, using static admin permissions");
                        Ok(self
                            .statics
                            .for_role(Role::Admin)
                            .cloned()
                            .unwrap_or_else(PermissionSet::none))
                    }
                    Err(e) => {
                        warn!(user_id = %principal.id, error = %e, "Permission override fetch failed");
                        Err(PermissionError::OverrideFetch(e))
                    }
                }
            }
            role => {
                info!(user_id = %principal.id, role = role.as_str(), "Role not permitted");
                Err(PermissionError::RoleNotPermitted(role))
            }
        }
    }

    /// Re-resolve after the principal's override was edited elsewhere.
    pub async fn refresh(&self, principal: &Principal) -> Result<PermissionSet, PermissionError> {
        self.load_permissions(principal).await
    }
}
