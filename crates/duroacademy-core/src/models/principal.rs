use serde::{Deserialize, Serialize};

/// Platform role as stored on the profile row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Instructor,
    Admin,
    SuperAdmin,
    /// Any role string this client does not recognise.
    #[serde(other)]
    Unknown,
}

impl Role {
    /// Only admins and super admins are let into the dashboard.
    pub fn can_access_dashboard(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Instructor => "instructor",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
            Role::Unknown => "unknown",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Instructor => "Instructor",
            Role::Admin => "Admin",
            Role::SuperAdmin => "Super Admin",
            Role::Unknown => "Unknown",
        }
    }
}

/// Identity resolved after authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Principal {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            email: None,
            full_name: None,
        }
    }

    /// Name for display, falling back to email and then the id.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}
