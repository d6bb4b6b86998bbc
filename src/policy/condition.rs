//! Condition engine.
//!
//! A [`Condition`] is a side-effect free predicate over
//! `(payment, amount, caller)`. Leaves inspect the payment or query the
//! [`PolicyContext`]; combinators compose other conditions as a tree.
//!
//! `And` and `Or` evaluate children in construction order and stop as soon as
//! the outcome is decided. Each combinator holds between one and
//! [`MAX_FANOUT`] children, enforced when the combinator is built.

use super::context::PolicyContext;
use crate::domain::amount::Balance;
use crate::domain::ids::{Address, PaymentId};
use crate::domain::payment::PaymentInfo;
use crate::error::{PaymentError, Result};
use std::fmt;
use std::sync::Arc;

/// Maximum number of children of an `And`/`Or` node.
pub const MAX_FANOUT: usize = 10;

/// The inputs a condition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub payment: &'a PaymentInfo,
    pub payment_id: &'a PaymentId,
    /// Amount of the operation; zero for operations without one.
    pub amount: Balance,
    pub caller: &'a Address,
}

/// A predicate supplied from outside the crate.
pub trait Predicate: fmt::Debug + Send + Sync {
    fn check(&self, ctx: &dyn PolicyContext, subject: &Subject<'_>) -> bool;
}

#[derive(Debug, Clone)]
pub enum Condition {
    AlwaysTrue,
    IsPayer,
    IsReceiver,
    IsArbiter,
    /// The escrow period of the payment is over.
    EscrowPeriodElapsed,
    /// The payment is not frozen.
    Unfrozen,
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Custom(Arc<dyn Predicate>),
}

impl Condition {
    /// Conjunction of `children`.
    pub fn and(children: Vec<Condition>) -> Result<Self> {
        check_fanout(children.len())?;
        Ok(Self::And(children))
    }

    /// Disjunction of `children`.
    pub fn or(children: Vec<Condition>) -> Result<Self> {
        check_fanout(children.len())?;
        Ok(Self::Or(children))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Condition) -> Self {
        Self::Not(Box::new(child))
    }

    pub fn custom(predicate: impl Predicate + 'static) -> Self {
        Self::Custom(Arc::new(predicate))
    }

    pub fn check(&self, ctx: &dyn PolicyContext, subject: &Subject<'_>) -> bool {
        match self {
            Self::AlwaysTrue => true,
            Self::IsPayer => subject.caller == &subject.payment.payer,
            Self::IsReceiver => subject.caller == &subject.payment.receiver,
            Self::IsArbiter => ctx.arbiter() == Some(subject.caller),
            Self::EscrowPeriodElapsed => ctx.escrow_period_elapsed(subject.payment_id),
            Self::Unfrozen => !ctx.is_frozen(subject.payment_id),
            Self::And(children) => {
                for child in children {
                    if !child.check(ctx, subject) {
                        return false;
                    }
                }
                true
            }
            Self::Or(children) => {
                for child in children {
                    if child.check(ctx, subject) {
                        return true;
                    }
                }
                false
            }
            Self::Not(child) => !child.check(ctx, subject),
            Self::Custom(predicate) => predicate.check(ctx, subject),
        }
    }
}

pub(crate) fn check_fanout(count: usize) -> Result<()> {
    if count == 0 {
        return Err(PaymentError::NoConditions);
    }
    if count > MAX_FANOUT {
        return Err(PaymentError::TooManyConditions {
            count,
            max: MAX_FANOUT,
        });
    }
    Ok(())
}
