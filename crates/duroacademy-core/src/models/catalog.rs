//! Reference data served through the cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A course module from the `modules` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order_index: Option<i32>,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Module {
    pub fn status_label(&self) -> &'static str {
        if self.is_published {
            "published"
        } else {
            "draft"
        }
    }
}

/// Headline counts for the dashboard screen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardCounts {
    pub users: u64,
    pub modules: u64,
    pub videos: u64,
    pub quizzes: u64,
    pub pending_access_requests: u64,
}
