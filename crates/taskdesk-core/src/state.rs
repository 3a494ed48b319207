//! Cache state shared by the engine and its consumers.

use serde::Serialize;

/// Freshness of one cached entity class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// No local copy yet
    Cold,
    /// Local copy within its freshness window
    Fresh,
    /// Local copy served while a refresh is due
    Stale,
    /// A refresh is in flight
    Syncing,
}

impl CacheState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cold => "cold",
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Syncing => "syncing",
        }
    }

    /// Whether a read can be answered from the local copy
    pub const fn is_servable(self) -> bool {
        !matches!(self, Self::Cold)
    }
}

impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
