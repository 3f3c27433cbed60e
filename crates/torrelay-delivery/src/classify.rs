//! Per-file delivery strategy selection.

use std::fmt::{self, Display, Formatter};

/// How a file reaches the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryStrategy {
    /// Single document on the primary channel.
    Direct,
    /// Reconstructable parts on the primary channel.
    Split,
    /// Upload through the relay, then re-send by identifier.
    Relay,
}

impl DeliveryStrategy {
    /// Stable label used in logs and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Split => "split",
            Self::Relay => "relay",
        }
    }
}

impl Display for DeliveryStrategy {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Why a strategy was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanReason {
    /// The file fits the primary channel limit.
    WithinDirectLimit,
    /// The file fits the relay limit.
    WithinRelayLimit,
    /// The relay is not configured or not reachable.
    RelayUnavailable,
    /// The file exceeds the relay limit too.
    ExceedsRelayLimit,
}

/// Strategy decision for one file; computed fresh per delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPlan {
    /// Selected strategy.
    pub strategy: DeliveryStrategy,
    /// Reason for the selection.
    pub reason: PlanReason,
}

/// Choose a strategy for a file of `file_size` bytes.
///
/// `relay_limit` is `Some` only when a relay is configured and reachable.
/// Both limits are inclusive.
#[must_use]
pub const fn classify(file_size: u64, direct_limit: u64, relay_limit: Option<u64>) -> DeliveryPlan {
    if file_size <= direct_limit {
        return DeliveryPlan {
            strategy: DeliveryStrategy::Direct,
            reason: PlanReason::WithinDirectLimit,
        };
    }
    match relay_limit {
        Some(limit) if file_size <= limit => DeliveryPlan {
            strategy: DeliveryStrategy::Relay,
            reason: PlanReason::WithinRelayLimit,
        },
        Some(_) => DeliveryPlan {
            strategy: DeliveryStrategy::Split,
            reason: PlanReason::ExceedsRelayLimit,
        },
        None => DeliveryPlan {
            strategy: DeliveryStrategy::Split,
            reason: PlanReason::RelayUnavailable,
        },
    }
}
