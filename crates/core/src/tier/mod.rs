use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::VizError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

/// What a tier unlocks. Only the export flags matter to the pipeline; the
/// rest are carried for front ends that gate on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub export_allowed: bool,
    pub max_duration_seconds: u32,
    pub custom_shaders: bool,
    pub advanced_effects: bool,
}

impl SubscriptionTier {
    pub const ALL: [SubscriptionTier; 3] = [
        SubscriptionTier::Free,
        SubscriptionTier::Pro,
        SubscriptionTier::Enterprise,
    ];

    pub fn policy(self) -> TierPolicy {
        match self {
            SubscriptionTier::Free => TierPolicy {
                export_allowed: false,
                max_duration_seconds: 0,
                custom_shaders: false,
                advanced_effects: false,
            },
            SubscriptionTier::Pro => TierPolicy {
                export_allowed: true,
                max_duration_seconds: 600,
                custom_shaders: true,
                advanced_effects: true,
            },
            SubscriptionTier::Enterprise => TierPolicy {
                export_allowed: true,
                max_duration_seconds: 3600,
                custom_shaders: true,
                advanced_effects: true,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = VizError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| VizError::invalid(format!("unknown subscription tier `{value}`")))
    }
}
