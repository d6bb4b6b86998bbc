//! Before/after hooks wrapped around each coordinator transition.
//!
//! A before-hook runs after the gate and may veto the transition by
//! returning an error. An after-hook observes the outcome once the ledger
//! operation has been staged; its failure is fatal to the transition too.
//! Both must refuse invocations that do not come from the coordinator they
//! are bound to.

use super::condition::{Condition, Subject};
use super::context::PolicyContext;
use crate::application::journal::Journal;
use crate::domain::action::{ActionSlot, Operation};
use crate::domain::amount::Balance;
use crate::domain::ids::{Address, PaymentId, Timestamp};
use crate::domain::payment::{PaymentRecord, PaymentState};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    #[error("invoked by {actual}, expected coordinator {expected}")]
    UnauthorizedInvoker { expected: Address, actual: Address },
    #[error("denied: {0}")]
    Denied(String),
    #[error("{0}")]
    Failed(String),
}

/// One call into a hook or recorder.
pub struct Invocation<'a> {
    /// The coordinator running the pipeline.
    pub invoker: &'a Address,
    pub slot: ActionSlot,
    pub operation: Operation,
    pub subject: Subject<'a>,
    pub ctx: &'a dyn PolicyContext,
}

impl Invocation<'_> {
    /// Rejects invocations that do not come from `coordinator`.
    pub fn ensure_invoker(&self, coordinator: &Address) -> Result<(), HookError> {
        if self.invoker != coordinator {
            return Err(HookError::UnauthorizedInvoker {
                expected: coordinator.clone(),
                actual: self.invoker.clone(),
            });
        }
        Ok(())
    }
}

/// What a transition did, as seen by after-hooks.
#[derive(Debug, Clone, Copy)]
pub struct Outcome<'a> {
    pub record: &'a PaymentRecord,
    pub state: PaymentState,
    pub fee: Balance,
}

pub trait BeforeHook: Send + Sync {
    fn check(&self, invocation: &Invocation<'_>) -> Result<(), HookError>;
}

pub trait AfterHook: Send + Sync {
    fn notify(
        &self,
        invocation: &Invocation<'_>,
        outcome: &Outcome<'_>,
        journal: &mut Journal,
    ) -> Result<(), HookError>;
}

/// Before-hook that vetoes transitions whose subject fails a condition.
#[derive(Debug, Clone)]
pub struct ConditionGuard {
    coordinator: Address,
    condition: Condition,
    reason: String,
}

impl ConditionGuard {
    pub fn new(coordinator: Address, condition: Condition, reason: impl Into<String>) -> Self {
        Self {
            coordinator,
            condition,
            reason: reason.into(),
        }
    }
}

impl BeforeHook for ConditionGuard {
    fn check(&self, invocation: &Invocation<'_>) -> Result<(), HookError> {
        invocation.ensure_invoker(&self.coordinator)?;
        if self.condition.check(invocation.ctx, &invocation.subject) {
            Ok(())
        } else {
            Err(HookError::Denied(self.reason.clone()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub slot: ActionSlot,
    pub operation: Operation,
    pub payment_id: PaymentId,
    pub amount: Balance,
    pub caller: Address,
    pub state: PaymentState,
    pub at: Timestamp,
}

/// After-hook keeping every notification it received, in order.
#[derive(Clone)]
pub struct NotificationLog {
    coordinator: Address,
    entries: Arc<RwLock<Vec<Notification>>>,
}

impl NotificationLog {
    pub fn new(coordinator: Address) -> Self {
        Self {
            coordinator,
            entries: Arc::default(),
        }
    }

    pub fn entries(&self) -> Vec<Notification> {
        self.entries.read().clone()
    }
}

impl AfterHook for NotificationLog {
    fn notify(
        &self,
        invocation: &Invocation<'_>,
        outcome: &Outcome<'_>,
        journal: &mut Journal,
    ) -> Result<(), HookError> {
        invocation.ensure_invoker(&self.coordinator)?;
        let len = {
            let mut entries = self.entries.write();
            entries.push(Notification {
                slot: invocation.slot,
                operation: invocation.operation,
                payment_id: *invocation.subject.payment_id,
                amount: invocation.subject.amount,
                caller: invocation.subject.caller.clone(),
                state: outcome.state,
                at: invocation.ctx.now(),
            });
            entries.len() - 1
        };

        let entries = self.entries.clone();
        journal.on_rollback(move || entries.write().truncate(len));
        Ok(())
    }
}
