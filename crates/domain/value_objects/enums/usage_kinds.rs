use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Which counters a publish consumes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    /// Weekly and monthly counters of a subscription entry.
    Subscription,
    /// `used_credits` of a package entry.
    Credits,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::Subscription => "subscription",
            UsageKind::Credits => "credits",
        }
    }
}

impl Display for UsageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
