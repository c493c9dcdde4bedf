use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One record in the value table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub written_at: DateTime<Utc>,
    /// Milliseconds; `None` never expires on its own.
    pub ttl_ms: Option<u64>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: Value, written_at: DateTime<Utc>, ttl_ms: Option<u64>) -> Self {
        Self {
            key: key.into(),
            value,
            written_at,
            ttl_ms,
        }
    }

    /// True once strictly more than `ttl_ms` has elapsed since the write.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_ms {
            Some(ttl) => {
                let ttl = Duration::milliseconds(i64::try_from(ttl).unwrap_or(i64::MAX));
                now - self.written_at > ttl
            }
            None => false,
        }
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.written_at).num_minutes()
    }

    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        let minutes = self.age_minutes(now);
        if minutes < 1 {
            // Negative ages come from clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// One record in the metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub key: String,
    pub value: String,
}
