use serde::{Deserialize, Serialize};
use std::fmt;

/// Configurable policy slots of a coordinator.
///
/// Each slot is bound to a gate condition and optional before-hook,
/// after-hook and recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSlot {
    Authorize,
    Release,
    RefundInEscrow,
    RefundPostEscrow,
}

impl ActionSlot {
    pub const ALL: [ActionSlot; 4] = [
        ActionSlot::Authorize,
        ActionSlot::Release,
        ActionSlot::RefundInEscrow,
        ActionSlot::RefundPostEscrow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::Release => "release",
            Self::RefundInEscrow => "refund_in_escrow",
            Self::RefundPostEscrow => "refund_post_escrow",
        }
    }
}

impl fmt::Display for ActionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State-changing transitions a coordinator performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Authorize,
    Release,
    RefundInEscrow,
    Void,
    Reclaim,
    RefundPostEscrow,
}

impl Operation {
    /// The policy slot governing this operation. `Void` shares the
    /// in-escrow refund slot; `Reclaim` is always the payer's right.
    pub fn slot(&self) -> Option<ActionSlot> {
        match self {
            Self::Authorize => Some(ActionSlot::Authorize),
            Self::Release => Some(ActionSlot::Release),
            Self::RefundInEscrow | Self::Void => Some(ActionSlot::RefundInEscrow),
            Self::RefundPostEscrow => Some(ActionSlot::RefundPostEscrow),
            Self::Reclaim => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::Release => "release",
            Self::RefundInEscrow => "refund_in_escrow",
            Self::Void => "void",
            Self::Reclaim => "reclaim",
            Self::RefundPostEscrow => "refund_post_escrow",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
