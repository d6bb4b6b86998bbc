//! Escrow periods and the freeze mechanism layered on top of them.
//!
//! An [`EscrowPeriod`] remembers when each payment was first authorized
//! (it is the authorization-time recorder of a freeze-aware coordinator) and
//! keeps a two-state `Unfrozen ⇄ Frozen` record per payment. Freezing is only
//! possible while the escrow period lasts; unfreezing is always possible so
//! funds can never stay locked because the period ran out.

use super::condition::{Condition, Subject};
use super::context::PolicyContext;
use super::hook::{HookError, Invocation};
use super::recorder::Recorder;
use crate::application::journal::Journal;
use crate::domain::action::ActionSlot;
pub use crate::domain::freeze::FreezeRecord;
use crate::domain::ids::{Address, PaymentId, Timestamp};
use crate::error::{PaymentError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Who may freeze and unfreeze payments, and for how long a freeze lasts.
#[derive(Debug, Clone)]
pub struct FreezePolicy {
    freeze_authorizer: Condition,
    unfreeze_authorizer: Condition,
    /// Seconds a freeze lasts; 0 keeps it until an explicit unfreeze.
    freeze_duration: u64,
}

impl FreezePolicy {
    pub fn new(freeze_authorizer: Condition, unfreeze_authorizer: Condition, freeze_duration: u64) -> Self {
        Self {
            freeze_authorizer,
            unfreeze_authorizer,
            freeze_duration,
        }
    }

    /// Whether the subject's caller may freeze, and the duration to apply.
    pub fn can_freeze(&self, ctx: &dyn PolicyContext, subject: &Subject<'_>) -> (bool, u64) {
        (self.freeze_authorizer.check(ctx, subject), self.freeze_duration)
    }

    pub fn can_unfreeze(&self, ctx: &dyn PolicyContext, subject: &Subject<'_>) -> bool {
        self.unfreeze_authorizer.check(ctx, subject)
    }

    pub fn freeze_duration(&self) -> u64 {
        self.freeze_duration
    }
}

pub struct EscrowPeriod {
    coordinator: Address,
    escrow_period: u64,
    policy: Option<Arc<FreezePolicy>>,
    records: Arc<RwLock<HashMap<PaymentId, FreezeRecord>>>,
}

impl EscrowPeriod {
    pub fn new(coordinator: Address, escrow_period: u64, policy: Option<Arc<FreezePolicy>>) -> Self {
        Self {
            coordinator,
            escrow_period,
            policy,
            records: Arc::default(),
        }
    }

    pub fn escrow_period(&self) -> u64 {
        self.escrow_period
    }

    pub fn coordinator(&self) -> &Address {
        &self.coordinator
    }

    pub fn freeze_policy(&self) -> Option<&Arc<FreezePolicy>> {
        self.policy.as_ref()
    }

    pub fn record_of(&self, payment_id: &PaymentId) -> Option<FreezeRecord> {
        self.records.read().get(payment_id).copied()
    }

    /// Loads previously persisted records, replacing any held for the same
    /// payments.
    pub fn restore(&self, records: impl IntoIterator<Item = (PaymentId, FreezeRecord)>) {
        self.records.write().extend(records);
    }

    pub fn authorized_at(&self, payment_id: &PaymentId) -> Option<Timestamp> {
        self.record_of(payment_id).map(|r| r.authorized_at)
    }

    /// End of the escrow period of an authorized payment.
    pub fn period_ends_at(&self, payment_id: &PaymentId) -> Option<Timestamp> {
        self.authorized_at(payment_id)
            .map(|at| at.saturating_add(self.escrow_period))
    }

    /// False for payments this escrow period never saw authorized.
    pub fn escrow_period_elapsed(&self, payment_id: &PaymentId, now: Timestamp) -> bool {
        self.period_ends_at(payment_id).is_some_and(|end| now >= end)
    }

    pub fn is_frozen(&self, payment_id: &PaymentId, now: Timestamp) -> bool {
        self.record_of(payment_id)
            .is_some_and(|r| r.is_frozen_at(now))
    }

    pub fn freeze(&self, ctx: &dyn PolicyContext, subject: &Subject<'_>) -> Result<FreezeRecord> {
        let policy = self.policy.as_ref().ok_or(PaymentError::NoFreezePolicy)?;
        let (allowed, duration) = policy.can_freeze(ctx, subject);
        if !allowed {
            return Err(PaymentError::UnauthorizedFreeze);
        }

        let now = ctx.now();
        let mut records = self.records.write();
        let record = records
            .get_mut(subject.payment_id)
            .ok_or(PaymentError::NotAuthorized)?;
        let period_end = record.authorized_at.saturating_add(self.escrow_period);
        if now >= period_end {
            return Err(PaymentError::EscrowPeriodExpired {
                expired_at: period_end.as_secs(),
            });
        }
        if record.is_frozen_at(now) {
            return Err(PaymentError::AlreadyFrozen);
        }

        record.frozen = true;
        record.freeze_expires_at = if duration == 0 {
            Timestamp::ZERO
        } else {
            now.saturating_add(duration)
        };
        Ok(*record)
    }

    pub fn unfreeze(&self, ctx: &dyn PolicyContext, subject: &Subject<'_>) -> Result<FreezeRecord> {
        let policy = self.policy.as_ref().ok_or(PaymentError::NoFreezePolicy)?;
        if !policy.can_unfreeze(ctx, subject) {
            return Err(PaymentError::UnauthorizedUnfreeze);
        }

        let now = ctx.now();
        let mut records = self.records.write();
        let record = match records.get_mut(subject.payment_id) {
            Some(record) if record.is_frozen_at(now) => record,
            _ => return Err(PaymentError::NotFrozen),
        };
        record.frozen = false;
        record.freeze_expires_at = Timestamp::ZERO;
        Ok(*record)
    }
}

impl Recorder for EscrowPeriod {
    /// Stamps the authorization time the first time a payment is authorized.
    fn record(&self, invocation: &Invocation<'_>, journal: &mut Journal) -> std::result::Result<(), HookError> {
        invocation.ensure_invoker(&self.coordinator)?;
        if invocation.slot != ActionSlot::Authorize {
            return Ok(());
        }

        let payment_id = *invocation.subject.payment_id;
        let mut records = self.records.write();
        if records.contains_key(&payment_id) {
            return Ok(());
        }
        records.insert(payment_id, FreezeRecord::new(invocation.ctx.now()));

        let records = self.records.clone();
        journal.on_rollback(move || {
            records.write().remove(&payment_id);
        });
        Ok(())
    }
}
