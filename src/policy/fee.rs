use super::condition::Subject;
use super::context::PolicyContext;
use crate::domain::amount::MAX_FEE_BPS;
use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};

/// Computes the fee, in basis points, charged on a release.
pub trait FeeCalculator: Send + Sync {
    fn fee_bps(&self, ctx: &dyn PolicyContext, subject: &Subject<'_>) -> u16;
}

/// The same fee for every release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatFee(pub u16);

impl FeeCalculator for FlatFee {
    fn fee_bps(&self, _ctx: &dyn PolicyContext, _subject: &Subject<'_>) -> u16 {
        self.0
    }
}

/// Inclusive range of fees a coordinator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBounds {
    pub min_bps: u16,
    pub max_bps: u16,
}

impl FeeBounds {
    pub const ZERO: Self = Self {
        min_bps: 0,
        max_bps: 0,
    };

    pub fn new(min_bps: u16, max_bps: u16) -> Result<Self> {
        if min_bps > max_bps || max_bps > MAX_FEE_BPS {
            return Err(PaymentError::ValidationError(format!(
                "invalid fee bounds [{min_bps}, {max_bps}]"
            )));
        }
        Ok(Self { min_bps, max_bps })
    }

    pub fn contains(&self, bps: u16) -> bool {
        (self.min_bps..=self.max_bps).contains(&bps)
    }

    /// Fails unless `bps` lies within these bounds.
    pub fn ensure_contains(&self, bps: u16) -> Result<()> {
        if !self.contains(bps) {
            return Err(PaymentError::FeeBoundsIncompatible {
                fee_bps: bps,
                min_bps: self.min_bps,
                max_bps: self.max_bps,
            });
        }
        Ok(())
    }

    /// Fails unless some fee satisfies both these bounds and `[min, max]`.
    pub fn ensure_overlaps(&self, min_bps: u16, max_bps: u16) -> Result<()> {
        if min_bps > self.max_bps || max_bps < self.min_bps {
            return Err(PaymentError::FeeBoundsIncompatible {
                fee_bps: min_bps,
                min_bps: self.min_bps,
                max_bps: self.max_bps,
            });
        }
        Ok(())
    }
}

impl Default for FeeBounds {
    fn default() -> Self {
        Self::ZERO
    }
}
