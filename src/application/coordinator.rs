//! The payment coordinator.
//!
//! Every state-changing call runs under one sequencer and goes through the
//! same pipeline: gate condition, before-hook, ledger primitive on a staged
//! record, after-hook, recorders. The staged record is only committed to the
//! ledger store once every stage succeeded; side effects written by hooks and
//! recorders are journaled and reverted when a later stage fails.

use super::audit::{AuditEntry, AuditEvent, AuditLog};
use super::journal::Journal;
use crate::domain::action::{ActionSlot, Operation};
use crate::domain::amount::{Amount, Balance};
use crate::domain::ids::{Address, AssetId, PaymentId, Timestamp};
use crate::domain::payment::{LedgerEntry, LedgerError, PaymentInfo, PaymentRecord, PaymentState, Posting};
use crate::domain::ports::{ClockRef, FreezeStoreBox, LedgerStoreBox};
use crate::error::{PaymentError, Result};
use crate::policy::condition::{Condition, Subject};
use crate::policy::context::PolicyContext;
use crate::policy::fee::{FeeBounds, FeeCalculator, FlatFee};
use crate::policy::freeze::{EscrowPeriod, FreezeRecord};
use crate::policy::hook::{AfterHook, BeforeHook, Invocation, Outcome};
use crate::policy::recorder::{Recorder, RecorderRef};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Everything bound to one [`ActionSlot`].
#[derive(Clone)]
pub struct ActionPolicy {
    pub condition: Condition,
    pub before: Option<Arc<dyn BeforeHook>>,
    pub after: Option<Arc<dyn AfterHook>>,
    pub recorder: Option<RecorderRef>,
}

impl ActionPolicy {
    pub fn gate(condition: Condition) -> Self {
        Self {
            condition,
            before: None,
            after: None,
            recorder: None,
        }
    }

    pub fn with_before(mut self, hook: Arc<dyn BeforeHook>) -> Self {
        self.before = Some(hook);
        self
    }

    pub fn with_after(mut self, hook: Arc<dyn AfterHook>) -> Self {
        self.after = Some(hook);
        self
    }

    pub fn with_recorder(mut self, recorder: RecorderRef) -> Self {
        self.recorder = Some(recorder);
        self
    }
}

struct Slots {
    authorize: ActionPolicy,
    release: ActionPolicy,
    refund_in_escrow: ActionPolicy,
    refund_post_escrow: ActionPolicy,
}

impl Slots {
    fn get(&self, slot: ActionSlot) -> &ActionPolicy {
        match slot {
            ActionSlot::Authorize => &self.authorize,
            ActionSlot::Release => &self.release,
            ActionSlot::RefundInEscrow => &self.refund_in_escrow,
            ActionSlot::RefundPostEscrow => &self.refund_post_escrow,
        }
    }
}

pub struct CoordinatorBuilder {
    address: Address,
    ledger: LedgerStoreBox,
    clock: ClockRef,
    slots: HashMap<ActionSlot, ActionPolicy>,
    fee_bounds: FeeBounds,
    fee_calculator: Arc<dyn FeeCalculator>,
    fee_receiver: Option<Address>,
    arbiter: Option<Address>,
    escrow: Option<Arc<EscrowPeriod>>,
    freezes: Option<FreezeStoreBox>,
    release_bypass: Condition,
    audit: Option<Arc<AuditLog>>,
}

impl CoordinatorBuilder {
    pub fn slot(mut self, slot: ActionSlot, policy: ActionPolicy) -> Self {
        self.slots.insert(slot, policy);
        self
    }

    pub fn fee_bounds(mut self, bounds: FeeBounds) -> Self {
        self.fee_bounds = bounds;
        self
    }

    pub fn fee_calculator(mut self, calculator: Arc<dyn FeeCalculator>) -> Self {
        self.fee_calculator = calculator;
        self
    }

    /// Where release fees go. Defaults to the coordinator itself.
    pub fn fee_receiver(mut self, receiver: Address) -> Self {
        self.fee_receiver = Some(receiver);
        self
    }

    pub fn arbiter(mut self, arbiter: Address) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    /// Makes the coordinator freeze-aware: authorizations are recorded in
    /// `escrow` and releases are locked during the escrow period.
    pub fn escrow_period(mut self, escrow: Arc<EscrowPeriod>) -> Self {
        self.escrow = Some(escrow);
        self
    }

    /// Persists the escrow period's records so authorization times and
    /// freezes survive a restart. See [`EscrowCoordinator::restore_freezes`].
    pub fn freeze_store(mut self, store: FreezeStoreBox) -> Self {
        self.freezes = Some(store);
        self
    }

    /// Who may release before the escrow period is over. Defaults to the
    /// payer.
    pub fn release_bypass(mut self, condition: Condition) -> Self {
        self.release_bypass = condition;
        self
    }

    pub fn audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn build(mut self) -> Result<EscrowCoordinator> {
        let mut take = |slot: ActionSlot| {
            self.slots.remove(&slot).ok_or_else(|| {
                PaymentError::ValidationError(format!("no policy configured for slot {slot}"))
            })
        };
        let slots = Slots {
            authorize: take(ActionSlot::Authorize)?,
            release: take(ActionSlot::Release)?,
            refund_in_escrow: take(ActionSlot::RefundInEscrow)?,
            refund_post_escrow: take(ActionSlot::RefundPostEscrow)?,
        };

        if let Some(escrow) = &self.escrow
            && escrow.coordinator() != &self.address
        {
            return Err(PaymentError::ValidationError(format!(
                "escrow period is bound to {}, not {}",
                escrow.coordinator(),
                self.address
            )));
        }

        let release_lock = self.escrow.as_ref().map(|_| {
            Condition::Or(vec![
                self.release_bypass,
                Condition::And(vec![Condition::EscrowPeriodElapsed, Condition::Unfrozen]),
            ])
        });

        Ok(EscrowCoordinator {
            fee_receiver: self.fee_receiver.unwrap_or_else(|| self.address.clone()),
            address: self.address,
            ledger: self.ledger,
            clock: self.clock,
            slots,
            fee_bounds: self.fee_bounds,
            fee_calculator: self.fee_calculator,
            arbiter: self.arbiter,
            escrow: self.escrow,
            freezes: self.freezes,
            release_lock,
            reclaim_gate: Condition::IsPayer,
            audit: self.audit.unwrap_or_default(),
            sequencer: Mutex::new(()),
        })
    }
}

/// What a committed transition did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionReceipt {
    pub payment_id: PaymentId,
    pub operation: Operation,
    pub state: PaymentState,
    pub record: PaymentRecord,
    pub postings: Vec<Posting>,
    pub fee: Balance,
    pub audit_sequence: u64,
}

/// Mediates every transition of the payments it operates.
pub struct EscrowCoordinator {
    address: Address,
    ledger: LedgerStoreBox,
    clock: ClockRef,
    slots: Slots,
    fee_bounds: FeeBounds,
    fee_calculator: Arc<dyn FeeCalculator>,
    fee_receiver: Address,
    arbiter: Option<Address>,
    escrow: Option<Arc<EscrowPeriod>>,
    freezes: Option<FreezeStoreBox>,
    release_lock: Option<Condition>,
    reclaim_gate: Condition,
    audit: Arc<AuditLog>,
    sequencer: Mutex<()>,
}

/// The coordinator as seen by policies during one operation.
struct View<'a> {
    coordinator: &'a EscrowCoordinator,
    now: Timestamp,
}

impl PolicyContext for View<'_> {
    fn now(&self) -> Timestamp {
        self.now
    }

    fn coordinator(&self) -> &Address {
        &self.coordinator.address
    }

    fn arbiter(&self) -> Option<&Address> {
        self.coordinator.arbiter.as_ref()
    }

    fn authorized_at(&self, payment_id: &PaymentId) -> Option<Timestamp> {
        self.coordinator
            .escrow
            .as_ref()
            .and_then(|e| e.authorized_at(payment_id))
    }

    fn escrow_period_elapsed(&self, payment_id: &PaymentId) -> bool {
        match &self.coordinator.escrow {
            Some(escrow) => escrow.escrow_period_elapsed(payment_id, self.now),
            None => true,
        }
    }

    fn is_frozen(&self, payment_id: &PaymentId) -> bool {
        self.coordinator
            .escrow
            .as_ref()
            .is_some_and(|e| e.is_frozen(payment_id, self.now))
    }
}

/// The ledger primitive a transition applies.
enum Primitive {
    Authorize(Amount),
    Capture(Amount),
    PartialVoid(Amount),
    Void,
    Reclaim,
    Refund(Amount),
}

impl Primitive {
    fn operation(&self) -> Operation {
        match self {
            Self::Authorize(_) => Operation::Authorize,
            Self::Capture(_) => Operation::Release,
            Self::PartialVoid(_) => Operation::RefundInEscrow,
            Self::Void => Operation::Void,
            Self::Reclaim => Operation::Reclaim,
            Self::Refund(_) => Operation::RefundPostEscrow,
        }
    }

    fn amount(&self) -> Option<Amount> {
        match self {
            Self::Authorize(a) | Self::Capture(a) | Self::PartialVoid(a) | Self::Refund(a) => {
                Some(*a)
            }
            Self::Void | Self::Reclaim => None,
        }
    }
}

impl EscrowCoordinator {
    pub fn builder(address: Address, ledger: LedgerStoreBox, clock: ClockRef) -> CoordinatorBuilder {
        CoordinatorBuilder {
            address,
            ledger,
            clock,
            slots: HashMap::new(),
            fee_bounds: FeeBounds::ZERO,
            fee_calculator: Arc::new(FlatFee(0)),
            fee_receiver: None,
            arbiter: None,
            escrow: None,
            freezes: None,
            release_bypass: Condition::IsPayer,
            audit: None,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn arbiter(&self) -> Option<&Address> {
        self.arbiter.as_ref()
    }

    pub fn escrow(&self) -> Option<&Arc<EscrowPeriod>> {
        self.escrow.as_ref()
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn policy(&self, slot: ActionSlot) -> &ActionPolicy {
        self.slots.get(slot)
    }

    /// Reloads persisted escrow-period records into the escrow period.
    ///
    /// Records of payments the ledger does not hold as collected belong to
    /// authorizations that never committed; they are discarded. Returns the
    /// number of records restored.
    pub async fn restore_freezes(&self) -> Result<usize> {
        let (Some(escrow), Some(store)) = (&self.escrow, &self.freezes) else {
            return Ok(0);
        };
        let mut restored = Vec::new();
        for (payment_id, record) in store.records().await? {
            let collected = self
                .ledger
                .get(&payment_id)
                .await?
                .is_some_and(|r| r.collected);
            if collected {
                restored.push((payment_id, record));
            } else {
                tracing::warn!(%payment_id, "discarding freeze record of an uncommitted authorization");
                store.remove(&payment_id).await?;
            }
        }

        let count = restored.len();
        let frozen = restored
            .iter()
            .filter(|(_, r)| r.is_frozen_at(self.clock.now()))
            .count();
        escrow.restore(restored);
        tracing::info!(restored = count, frozen, "restored escrow period records");
        Ok(count)
    }

    pub async fn authorize(
        &self,
        payment: &PaymentInfo,
        amount: Amount,
        caller: &Address,
    ) -> Result<TransitionReceipt> {
        self.transition(payment, caller, Primitive::Authorize(amount))
            .await
    }

    pub async fn release(
        &self,
        payment: &PaymentInfo,
        amount: Amount,
        caller: &Address,
    ) -> Result<TransitionReceipt> {
        self.transition(payment, caller, Primitive::Capture(amount))
            .await
    }

    pub async fn refund_in_escrow(
        &self,
        payment: &PaymentInfo,
        amount: Amount,
        caller: &Address,
    ) -> Result<TransitionReceipt> {
        self.transition(payment, caller, Primitive::PartialVoid(amount))
            .await
    }

    /// Returns everything still in escrow to the payer.
    pub async fn void(&self, payment: &PaymentInfo, caller: &Address) -> Result<TransitionReceipt> {
        self.transition(payment, caller, Primitive::Void).await
    }

    /// Lets the payer recover escrowed funds after the authorization expired.
    pub async fn reclaim(&self, payment: &PaymentInfo, caller: &Address) -> Result<TransitionReceipt> {
        self.transition(payment, caller, Primitive::Reclaim).await
    }

    pub async fn refund_post_escrow(
        &self,
        payment: &PaymentInfo,
        amount: Amount,
        caller: &Address,
    ) -> Result<TransitionReceipt> {
        self.transition(payment, caller, Primitive::Refund(amount))
            .await
    }

    pub async fn freeze(&self, payment: &PaymentInfo, caller: &Address) -> Result<FreezeRecord> {
        self.set_frozen(payment, caller, true).await
    }

    pub async fn unfreeze(&self, payment: &PaymentInfo, caller: &Address) -> Result<FreezeRecord> {
        self.set_frozen(payment, caller, false).await
    }

    pub async fn payment_state(&self, payment: &PaymentInfo) -> Result<PaymentState> {
        let record = self.ledger.get(&payment.id()?).await?;
        Ok(PaymentState::derive(
            record.as_ref(),
            payment,
            self.clock.now(),
        ))
    }

    pub async fn record(&self, payment_id: &PaymentId) -> Result<Option<PaymentRecord>> {
        self.ledger.get(payment_id).await
    }

    pub async fn balance(&self, party: &Address, asset: &AssetId) -> Result<Balance> {
        self.ledger.balance(party, asset).await
    }

    pub fn is_frozen(&self, payment_id: &PaymentId) -> bool {
        self.view(self.clock.now()).is_frozen(payment_id)
    }

    /// Whether `caller` passes the gate of `slot` for `payment` right now.
    pub fn can_act(&self, slot: ActionSlot, payment: &PaymentInfo, caller: &Address) -> Result<bool> {
        let payment_id = payment.id()?;
        let subject = Subject {
            payment,
            payment_id: &payment_id,
            amount: Balance::ZERO,
            caller,
        };
        Ok(self
            .slots
            .get(slot)
            .condition
            .check(&self.view(self.clock.now()), &subject))
    }

    /// Whether `who` may attach evidence to `payment`: either party, or
    /// anyone allowed to refund it in escrow.
    pub fn is_evidence_submitter(&self, payment: &PaymentInfo, who: &Address) -> Result<bool> {
        if who == &payment.payer || who == &payment.receiver {
            return Ok(true);
        }
        self.can_act(ActionSlot::RefundInEscrow, payment, who)
    }

    pub fn ensure_payer_or_arbiter(&self, payment: &PaymentInfo, who: &Address) -> Result<()> {
        if who == &payment.payer || self.arbiter.as_ref() == Some(who) {
            Ok(())
        } else {
            Err(PaymentError::NotPayerOrArbiter)
        }
    }

    fn view(&self, now: Timestamp) -> View<'_> {
        View {
            coordinator: self,
            now,
        }
    }

    async fn transition(
        &self,
        payment: &PaymentInfo,
        caller: &Address,
        primitive: Primitive,
    ) -> Result<TransitionReceipt> {
        let operation = primitive.operation();
        let _turn = self.sequencer.lock().await;
        let result = self.run_pipeline(payment, caller, primitive).await;
        if let Err(e) = &result {
            tracing::debug!(%operation, %caller, error = %e, "transition rejected");
        }
        result
    }

    async fn run_pipeline(
        &self,
        payment: &PaymentInfo,
        caller: &Address,
        primitive: Primitive,
    ) -> Result<TransitionReceipt> {
        let operation = primitive.operation();
        let slot = operation.slot();
        let now = self.clock.now();
        let ctx = self.view(now);
        let payment_id = payment.id()?;
        let current = self.ledger.get(&payment_id).await?;

        let amount = match primitive.amount() {
            Some(amount) => Balance::from(amount),
            None => current.as_ref().map_or(Balance::ZERO, |r| r.capturable),
        };
        let subject = Subject {
            payment,
            payment_id: &payment_id,
            amount,
            caller,
        };
        let policy = slot.map(|slot| self.slots.get(slot));

        // Gate.
        let gate = policy.map_or(&self.reclaim_gate, |p| &p.condition);
        if !gate.check(&ctx, &subject) {
            return Err(PaymentError::ConditionNotMet { operation });
        }

        // Before-hook.
        if let (Some(slot), Some(before)) = (slot, policy.and_then(|p| p.before.as_ref())) {
            let invocation = self.invocation(slot, operation, subject, &ctx);
            before
                .check(&invocation)
                .map_err(|source| PaymentError::BeforeHookRejected { slot, source })?;
        }

        let mut fee_bps = 0;
        match &primitive {
            Primitive::Authorize(_) => {
                self.fee_bounds
                    .ensure_overlaps(payment.min_fee_bps, payment.max_fee_bps)?;
            }
            Primitive::Capture(_) => {
                if let Some(lock) = &self.release_lock
                    && !lock.check(&ctx, &subject)
                {
                    return Err(PaymentError::ReleaseLocked);
                }
                fee_bps = self.fee_calculator.fee_bps(&ctx, &subject);
                self.fee_bounds.ensure_contains(fee_bps)?;
            }
            _ => {}
        }

        // Ledger primitive on a staged copy.
        let mut staged = current.unwrap_or_else(|| PaymentRecord::new(payment_id));
        let postings = match primitive {
            Primitive::Authorize(a) => staged.authorize(payment, a, &self.address, now)?,
            Primitive::Capture(a) => {
                staged.capture(payment, a, fee_bps, &self.fee_receiver, &self.address, now)?
            }
            Primitive::PartialVoid(a) => staged.partial_void(payment, a, &self.address)?,
            Primitive::Void => staged.void(payment, &self.address)?,
            Primitive::Reclaim => staged.reclaim(payment, now)?,
            Primitive::Refund(a) => staged.refund(payment, a, &self.address, now)?,
        };
        let fee = match primitive {
            Primitive::Capture(a) => a.fee_at(fee_bps).ok_or(LedgerError::Overflow)?,
            _ => Balance::ZERO,
        };
        let state = PaymentState::derive(Some(&staged), payment, now);

        // After-hook and recorders, then the commit.
        let escrow_before = self.escrow.as_ref().and_then(|e| e.record_of(&payment_id));
        let mut journal = Journal::new();
        if let Some(slot) = slot {
            let invocation = self.invocation(slot, operation, subject, &ctx);
            let outcome = Outcome {
                record: &staged,
                state,
                fee,
            };
            if let Err(e) = self.run_effects(slot, &invocation, &outcome, &mut journal) {
                self.roll_back(journal, operation, &payment_id);
                return Err(e);
            }
        }

        // A freshly stamped authorization time is persisted ahead of the
        // ledger commit and withdrawn if that commit fails.
        let stamped = match (&self.escrow, &self.freezes) {
            (Some(escrow), Some(store)) if escrow_before.is_none() => {
                escrow.record_of(&payment_id).map(|record| (store, record))
            }
            _ => None,
        };
        if let Some((store, record)) = stamped
            && let Err(e) = store.put(payment_id, record).await
        {
            self.roll_back(journal, operation, &payment_id);
            return Err(e);
        }

        let entry = LedgerEntry {
            record: staged.clone(),
            postings: postings.clone(),
        };
        if let Err(e) = self.ledger.commit(entry).await {
            if let Some((store, _)) = stamped
                && let Err(cleanup) = store.remove(&payment_id).await
            {
                tracing::warn!(%payment_id, error = %cleanup, "failed to withdraw freeze record");
            }
            self.roll_back(journal, operation, &payment_id);
            return Err(e);
        }
        journal.commit();

        let audited = self.audit.append(
            AuditEntry::new(AuditEvent::Transition(operation), caller, now)
                .with_payment(payment_id)
                .with_amount(amount),
        );
        Ok(TransitionReceipt {
            payment_id,
            operation,
            state,
            record: staged,
            postings,
            fee,
            audit_sequence: audited.sequence,
        })
    }

    fn run_effects(
        &self,
        slot: ActionSlot,
        invocation: &Invocation<'_>,
        outcome: &Outcome<'_>,
        journal: &mut Journal,
    ) -> Result<()> {
        let policy = self.slots.get(slot);
        if let Some(after) = &policy.after {
            after
                .notify(invocation, outcome, journal)
                .map_err(|source| PaymentError::AfterHookFailed { slot, source })?;
        }
        if let Some(escrow) = &self.escrow {
            escrow
                .record(invocation, journal)
                .map_err(PaymentError::RecorderFailed)?;
        }
        if let Some(recorder) = &policy.recorder {
            recorder
                .record(invocation, journal)
                .map_err(PaymentError::RecorderFailed)?;
        }
        Ok(())
    }

    fn roll_back(&self, journal: Journal, operation: Operation, payment_id: &PaymentId) {
        tracing::warn!(
            %operation,
            %payment_id,
            writes = journal.len(),
            "rolling back transition side effects"
        );
        journal.rollback();
    }

    fn invocation<'a>(
        &'a self,
        slot: ActionSlot,
        operation: Operation,
        subject: Subject<'a>,
        ctx: &'a View<'a>,
    ) -> Invocation<'a> {
        Invocation {
            invoker: &self.address,
            slot,
            operation,
            subject,
            ctx,
        }
    }

    async fn set_frozen(
        &self,
        payment: &PaymentInfo,
        caller: &Address,
        freeze: bool,
    ) -> Result<FreezeRecord> {
        let _turn = self.sequencer.lock().await;
        let escrow = self.escrow.as_ref().ok_or(PaymentError::NoFreezePolicy)?;
        let now = self.clock.now();
        let ctx = self.view(now);
        let payment_id = payment.id()?;
        let subject = Subject {
            payment,
            payment_id: &payment_id,
            amount: Balance::ZERO,
            caller,
        };

        let previous = escrow.record_of(&payment_id);
        let result = if freeze {
            escrow.freeze(&ctx, &subject)
        } else {
            escrow.unfreeze(&ctx, &subject)
        };
        let record = result.inspect_err(|e| {
            tracing::debug!(freeze, %caller, error = %e, "freeze change rejected");
        })?;

        if let Some(store) = &self.freezes
            && let Err(e) = store.put(payment_id, record).await
        {
            tracing::warn!(freeze, %payment_id, error = %e, "failed to persist freeze change");
            if let Some(previous) = previous {
                escrow.restore([(payment_id, previous)]);
            }
            return Err(e);
        }

        let event = if freeze {
            AuditEvent::Freeze
        } else {
            AuditEvent::Unfreeze
        };
        self.audit
            .append(AuditEntry::new(event, caller, now).with_payment(payment_id));
        Ok(record)
    }
}
