use std::time::Duration;

/// Frequently changing counts (dashboard totals, pending requests).
pub const SHORT_MS: u64 = 2 * 60 * 1000;

/// Lists edited during a typical admin session.
pub const MEDIUM_MS: u64 = 10 * 60 * 1000;

/// Catalog data that changes a few times a day.
pub const LONG_MS: u64 = 30 * 60 * 1000;

/// Near-static lookup tables.
pub const VERY_LONG_MS: u64 = 2 * 60 * 60 * 1000;

/// Named TTL presets, one per data category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPreset {
    Short,
    Medium,
    Long,
    VeryLong,
    /// Never expires on its own; cleared at logout.
    Session,
}

impl TtlPreset {
    pub fn millis(&self) -> Option<u64> {
        match self {
            TtlPreset::Short => Some(SHORT_MS),
            TtlPreset::Medium => Some(MEDIUM_MS),
            TtlPreset::Long => Some(LONG_MS),
            TtlPreset::VeryLong => Some(VERY_LONG_MS),
            TtlPreset::Session => None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.millis().map(Duration::from_millis)
    }
}
