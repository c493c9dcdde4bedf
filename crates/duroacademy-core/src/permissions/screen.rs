use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A gated unit of dashboard functionality.
///
/// The wire form (`DASHBOARD`, `ACCESS_REQUESTS`, ...) is shared by the static
/// role config and the remote override rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Screen {
    Dashboard,
    Users,
    Modules,
    Videos,
    Quizzes,
    Banners,
    Notifications,
    AccessRequests,
    AdminPermissions,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown screen: {0}")]
pub struct UnknownScreen(pub String);

impl Screen {
    pub const ALL: [Screen; 9] = [
        Screen::Dashboard,
        Screen::Users,
        Screen::Modules,
        Screen::Videos,
        Screen::Quizzes,
        Screen::Banners,
        Screen::Notifications,
        Screen::AccessRequests,
        Screen::AdminPermissions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Screen::Dashboard => "DASHBOARD",
            Screen::Users => "USERS",
            Screen::Modules => "MODULES",
            Screen::Videos => "VIDEOS",
            Screen::Quizzes => "QUIZZES",
            Screen::Banners => "BANNERS",
            Screen::Notifications => "NOTIFICATIONS",
            Screen::AccessRequests => "ACCESS_REQUESTS",
            Screen::AdminPermissions => "ADMIN_PERMISSIONS",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Screen::Dashboard => "Dashboard",
            Screen::Users => "Users",
            Screen::Modules => "Modules",
            Screen::Videos => "Videos",
            Screen::Quizzes => "Quizzes",
            Screen::Banners => "Banners",
            Screen::Notifications => "Notifications",
            Screen::AccessRequests => "Access Requests",
            Screen::AdminPermissions => "Admin Permissions",
        }
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Screen {
    type Err = UnknownScreen;

    /// Case-insensitive; `-` and `_` are interchangeable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Screen::ALL
            .iter()
            .copied()
            .find(|screen| screen.as_str() == normalized)
            .ok_or_else(|| UnknownScreen(s.to_string()))
    }
}
