//! Order lifecycle.
//!
//! ```text
//!  QUEUED ──first job starts──▶ IN_PROGRESS ──fulfillment──▶ SHIPPED ──▶ FINISHED
//!    │                             │   └──────fulfillment──────────────▶ FINISHED
//!    └──────permanent job failure──┴──▶ CANCELLED (absorbing)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Queued,
    InProgress,
    Shipped,
    Finished,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        Self::Queued,
        Self::InProgress,
        Self::Shipped,
        Self::Finished,
        Self::Cancelled,
    ];

    /// Returns true if no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }

    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Queued => matches!(target, Self::InProgress | Self::Cancelled),
            Self::InProgress => {
                matches!(target, Self::Shipped | Self::Finished | Self::Cancelled)
            }
            Self::Shipped => matches!(target, Self::Finished),
            Self::Finished | Self::Cancelled => false,
        }
    }

    /// Every state from which `target` is reachable in one step.
    pub fn sources_of(target: Self) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }

    /// Shipped or finished. Job rows of a fulfilled order are frozen.
    #[must_use]
    pub const fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Shipped | Self::Finished)
    }

    /// Requires every job of the order to carry an estimate.
    #[must_use]
    pub const fn requires_complete_jobs(&self) -> bool {
        self.is_fulfilled()
    }

    /// Stored column value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Shipped => "shipped",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "QUEUED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Shipped => write!(f, "SHIPPED"),
            Self::Finished => write!(f, "FINISHED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}
