//! Well-known cache keys.

pub const MODULE_CATALOG: &str = "modules:catalog";

pub const DASHBOARD_COUNTS: &str = "dashboard:counts";

/// Metadata key for the email pre-filled on the login prompt.
pub const META_REMEMBERED_EMAIL: &str = "remembered_email";
