use serde::{Deserialize, Serialize};

use super::resolver::{PermissionError, PermissionResolver};
use super::screen::Screen;
use super::set::PermissionSet;
use crate::models::{Principal, Role};

/// Why a session was denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    RoleNotPermitted { role: Role },
    FetchFailed { message: String },
}

impl From<&PermissionError> for DenyReason {
    fn from(err: &PermissionError) -> Self {
        match err {
            PermissionError::RoleNotPermitted(role) => DenyReason::RoleNotPermitted { role: *role },
            PermissionError::OverrideFetch(e) => DenyReason::FetchFailed {
                message: e.to_string(),
            },
        }
    }
}

/// Resolution progress for one signed-in principal.
///
/// `Unresolved -> Resolving -> Resolved | Denied`. `Denied` is final for the
/// session; `Resolved` may go back through `Resolving` on refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ResolutionState {
    Unresolved,
    Resolving,
    Resolved(PermissionSet),
    Denied(DenyReason),
}

impl ResolutionState {
    pub fn is_denied(&self) -> bool {
        matches!(self, ResolutionState::Denied(_))
    }

    pub fn permission_set(&self) -> Option<&PermissionSet> {
        match self {
            ResolutionState::Resolved(set) => Some(set),
            _ => None,
        }
    }
}

/// Permission state tracked for the signed-in principal.
#[derive(Debug, Clone)]
pub struct PermissionSession {
    principal: Principal,
    state: ResolutionState,
    generation: u64,
}

impl PermissionSession {
    pub fn new(principal: Principal) -> Self {
        Self::with_generation(principal, 0)
    }

    /// A session tagged with the sign-in it belongs to. Results computed for
    /// another generation must not be applied to this one.
    pub fn with_generation(principal: Principal, generation: u64) -> Self {
        Self {
            principal,
            state: ResolutionState::Unresolved,
            generation,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> &ResolutionState {
        &self.state
    }

    /// Enter `Resolving`. Returns false when the session is already denied.
    pub fn begin(&mut self) -> bool {
        if self.state.is_denied() {
            return false;
        }
        self.state = ResolutionState::Resolving;
        true
    }

    /// Record the outcome of a resolution started with [`begin`](Self::begin).
    /// Errors fail closed.
    pub fn complete(&mut self, result: Result<PermissionSet, PermissionError>) -> &ResolutionState {
        if !self.state.is_denied() {
            self.state = match result {
                Ok(set) => ResolutionState::Resolved(set),
                Err(e) => ResolutionState::Denied(DenyReason::from(&e)),
            };
        }
        &self.state
    }

    /// `begin` + resolve + `complete` in one step.
    pub async fn resolve(&mut self, resolver: &PermissionResolver) -> &ResolutionState {
        if self.begin() {
            let result = resolver.load_permissions(&self.principal).await;
            self.complete(result);
        }
        &self.state
    }

    /// False unless resolved and the screen is allowed.
    pub fn can_view(&self, screen: Screen) -> bool {
        self.state
            .permission_set()
            .map(|set| set.allows(screen))
            .unwrap_or(false)
    }

    pub fn visible_screens(&self) -> Vec<Screen> {
        self.state
            .permission_set()
            .map(PermissionSet::visible_screens)
            .unwrap_or_default()
    }
}
