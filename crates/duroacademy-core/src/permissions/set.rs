use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use super::screen::Screen;
use crate::models::Role;

/// Screens a principal may open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "kind", content = "screens", rename_all = "snake_case")]
pub enum PermissionSet {
    /// Every screen, including ones added after resolution.
    All,
    Screens(BTreeSet<Screen>),
}

impl PermissionSet {
    pub fn screens(screens: impl IntoIterator<Item = Screen>) -> Self {
        PermissionSet::Screens(screens.into_iter().collect())
    }

    pub fn none() -> Self {
        PermissionSet::Screens(BTreeSet::new())
    }

    pub fn allows(&self, screen: Screen) -> bool {
        match self {
            PermissionSet::All => true,
            PermissionSet::Screens(set) => set.contains(&screen),
        }
    }

    /// Allowed screens in menu order.
    pub fn visible_screens(&self) -> Vec<Screen> {
        Screen::ALL
            .iter()
            .copied()
            .filter(|s| self.allows(*s))
            .collect()
    }
}

/// Pure access check; no I/O.
pub fn has_access(set: &PermissionSet, screen: Screen) -> bool {
    set.allows(screen)
}

/// Role defaults from configuration. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticRolePermissions {
    roles: BTreeMap<Role, PermissionSet>,
}

impl StaticRolePermissions {
    pub fn new(roles: BTreeMap<Role, PermissionSet>) -> Self {
        Self { roles }
    }

    pub fn for_role(&self, role: Role) -> Option<&PermissionSet> {
        self.roles.get(&role)
    }
}

impl Default for StaticRolePermissions {
    fn default() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(Role::SuperAdmin, PermissionSet::All);
        roles.insert(
            Role::Admin,
            PermissionSet::screens(
                Screen::ALL
                    .iter()
                    .copied()
                    .filter(|s| *s != Screen::AdminPermissions),
            ),
        );
        Self { roles }
    }
}

/// Per-admin override row from the `admin_permissions` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverride {
    pub user_id: String,
    #[serde(deserialize_with = "deserialize_screens")]
    pub allowed_screens: BTreeSet<Screen>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Screen names this build does not know are dropped rather than failing
/// the whole row; they can never grant anything here anyway.
fn deserialize_screens<'de, D>(deserializer: D) -> Result<BTreeSet<Screen>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<String>> = Option::deserialize(deserializer)?;
    let mut screens = BTreeSet::new();
    for name in raw.unwrap_or_default() {
        match name.parse::<Screen>() {
            Ok(screen) => {
                screens.insert(screen);
            }
            Err(e) => warn!(error = %e, "Ignoring unknown screen in permission override"),
        }
    }
    Ok(screens)
}
