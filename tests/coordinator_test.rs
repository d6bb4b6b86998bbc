use escrow_policy::application::coordinator::ActionPolicy;
use escrow_policy::application::journal::Journal;
use escrow_policy::domain::action::{ActionSlot, Operation};
use escrow_policy::domain::amount::Balance;
use escrow_policy::domain::ids::{Address, Timestamp};
use escrow_policy::domain::payment::{LedgerError, PaymentState};
use escrow_policy::error::PaymentError;
use escrow_policy::policy::condition::{Condition, Subject};
use escrow_policy::policy::context::PolicyContext;
use escrow_policy::policy::fee::{FeeBounds, FeeCalculator, FlatFee};
use escrow_policy::policy::freeze::EscrowPeriod;
use escrow_policy::policy::hook::{
    AfterHook, ConditionGuard, HookError, Invocation, NotificationLog, Outcome,
};
use escrow_policy::policy::recorder::{
    PaymentIndexRecorder, Recorder, RecorderCombinator, RecorderRef,
};
use rust_decimal_macros::dec;
use std::sync::Arc;

mod common;
use common::{addr, amount, builder, open_slots, payment};

/// Writes a notification, then fails.
struct NotifyThenFail(NotificationLog);

impl AfterHook for NotifyThenFail {
    fn notify(
        &self,
        invocation: &Invocation<'_>,
        outcome: &Outcome<'_>,
        journal: &mut Journal,
    ) -> Result<(), HookError> {
        self.0.notify(invocation, outcome, journal)?;
        Err(HookError::Failed("webhook unreachable".to_string()))
    }
}

struct FailingRecorder;

impl Recorder for FailingRecorder {
    fn record(&self, _invocation: &Invocation<'_>, _journal: &mut Journal) -> Result<(), HookError> {
        Err(HookError::Failed("index offline".to_string()))
    }
}

/// Charges more on larger releases.
struct TieredFee;

impl FeeCalculator for TieredFee {
    fn fee_bps(&self, _ctx: &dyn PolicyContext, subject: &Subject<'_>) -> u16 {
        if subject.amount > Balance::new(dec!(50)) { 600 } else { 150 }
    }
}

#[tokio::test]
async fn test_after_hook_failure_leaves_no_trace() {
    let log = NotificationLog::new(addr("operator"));
    let (builder, _clock) = builder();
    let coordinator = open_slots(builder, &[ActionSlot::Release])
        .slot(
            ActionSlot::Release,
            ActionPolicy::gate(Condition::AlwaysTrue)
                .with_after(Arc::new(NotifyThenFail(log.clone()))),
        )
        .build()
        .unwrap();

    let payment = payment(1);
    coordinator
        .authorize(&payment, amount(dec!(60)), &addr("operator"))
        .await
        .unwrap();
    let audited = coordinator.audit().len();

    let result = coordinator
        .release(&payment, amount(dec!(60)), &addr("receiver"))
        .await;
    assert!(matches!(
        result,
        Err(PaymentError::AfterHookFailed { slot: ActionSlot::Release, .. })
    ));

    assert_eq!(
        coordinator.payment_state(&payment).await.unwrap(),
        PaymentState::InEscrow
    );
    let record = coordinator.record(&payment.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(record.capturable, Balance::new(dec!(60)));
    assert!(record.refundable.is_zero());
    assert!(coordinator
        .balance(&payment.receiver, &payment.asset)
        .await
        .unwrap()
        .is_zero());
    assert!(log.entries().is_empty());
    assert_eq!(coordinator.audit().len(), audited);
}

#[tokio::test]
async fn test_recorder_failure_reverts_hooks_and_earlier_recorders() {
    let log = NotificationLog::new(addr("operator"));
    let index = Arc::new(PaymentIndexRecorder::new(addr("operator")));
    let combinator = RecorderCombinator::new(vec![
        index.clone() as RecorderRef,
        Arc::new(FailingRecorder),
    ])
    .unwrap();

    let (builder, _clock) = builder();
    let coordinator = open_slots(builder, &[ActionSlot::Authorize])
        .slot(
            ActionSlot::Authorize,
            ActionPolicy::gate(Condition::AlwaysTrue)
                .with_after(Arc::new(log.clone()))
                .with_recorder(Arc::new(combinator)),
        )
        .build()
        .unwrap();

    let payment = payment(1);
    let result = coordinator
        .authorize(&payment, amount(dec!(60)), &addr("operator"))
        .await;
    assert!(matches!(result, Err(PaymentError::RecorderFailed(_))));

    assert_eq!(
        coordinator.payment_state(&payment).await.unwrap(),
        PaymentState::NonExistent
    );
    assert!(log.entries().is_empty());
    assert_eq!(index.payments_of_payer(&payment.payer, 0, 10).total, 0);
    assert!(coordinator
        .balance(&payment.payer, &payment.asset)
        .await
        .unwrap()
        .is_zero());
}

#[tokio::test]
async fn test_recorder_failure_forgets_authorization_time() {
    let escrow = Arc::new(EscrowPeriod::new(addr("operator"), 100, None));
    let (builder, _clock) = builder();
    let coordinator = open_slots(builder.escrow_period(escrow.clone()), &[ActionSlot::Authorize])
        .slot(
            ActionSlot::Authorize,
            ActionPolicy::gate(Condition::AlwaysTrue).with_recorder(Arc::new(FailingRecorder)),
        )
        .build()
        .unwrap();

    let payment = payment(1);
    assert!(coordinator
        .authorize(&payment, amount(dec!(10)), &addr("operator"))
        .await
        .is_err());
    assert_eq!(escrow.authorized_at(&payment.id().unwrap()), None);
}

#[tokio::test]
async fn test_successful_effects_are_kept() {
    let log = NotificationLog::new(addr("operator"));
    let index = Arc::new(PaymentIndexRecorder::new(addr("operator")));
    let (builder, _clock) = builder();
    let coordinator = open_slots(builder, &[ActionSlot::Authorize])
        .slot(
            ActionSlot::Authorize,
            ActionPolicy::gate(Condition::AlwaysTrue)
                .with_after(Arc::new(log.clone()))
                .with_recorder(index.clone()),
        )
        .build()
        .unwrap();

    for salt in 0..3 {
        coordinator
            .authorize(&payment(salt), amount(dec!(10)), &addr("operator"))
            .await
            .unwrap();
    }

    assert_eq!(log.entries().len(), 3);
    assert!(log.entries().iter().all(|n| n.state == PaymentState::InEscrow));
    let page = index.payments_of_receiver(&addr("receiver"), 1, 5);
    assert_eq!(page.total, 3);
    assert_eq!(page.items, vec![payment(1).id().unwrap(), payment(2).id().unwrap()]);
}

#[tokio::test]
async fn test_gate_and_before_hook() {
    let (builder, _clock) = builder();
    let coordinator = open_slots(builder, &[ActionSlot::Release, ActionSlot::RefundInEscrow])
        .slot(ActionSlot::Release, ActionPolicy::gate(Condition::IsReceiver))
        .slot(
            ActionSlot::RefundInEscrow,
            ActionPolicy::gate(Condition::AlwaysTrue).with_before(Arc::new(ConditionGuard::new(
                addr("operator"),
                Condition::IsArbiter,
                "only the arbiter refunds in escrow",
            ))),
        )
        .arbiter(addr("arbiter"))
        .build()
        .unwrap();

    let payment = payment(1);
    coordinator
        .authorize(&payment, amount(dec!(10)), &addr("operator"))
        .await
        .unwrap();

    assert!(matches!(
        coordinator.release(&payment, amount(dec!(10)), &addr("payer")).await,
        Err(PaymentError::ConditionNotMet { operation: Operation::Release })
    ));
    // Void shares the in-escrow refund slot.
    assert!(matches!(
        coordinator.void(&payment, &addr("payer")).await,
        Err(PaymentError::BeforeHookRejected {
            slot: ActionSlot::RefundInEscrow,
            source: HookError::Denied(_),
        })
    ));

    let receipt = coordinator.void(&payment, &addr("arbiter")).await.unwrap();
    assert_eq!(receipt.operation, Operation::Void);
    assert_eq!(receipt.state, PaymentState::Settled);
    assert!(coordinator
        .balance(&payment.payer, &payment.asset)
        .await
        .unwrap()
        .is_zero());

    assert!(matches!(
        coordinator.void(&payment, &addr("arbiter")).await,
        Err(PaymentError::Ledger(LedgerError::NothingToRefund))
    ));
}

#[tokio::test]
async fn test_hook_bound_to_another_coordinator_refuses() {
    let (builder, _clock) = builder();
    let coordinator = open_slots(builder, &[ActionSlot::Authorize])
        .slot(
            ActionSlot::Authorize,
            ActionPolicy::gate(Condition::AlwaysTrue).with_before(Arc::new(ConditionGuard::new(
                addr("other-coordinator"),
                Condition::AlwaysTrue,
                "never",
            ))),
        )
        .build()
        .unwrap();

    let result = coordinator
        .authorize(&payment(1), amount(dec!(10)), &addr("operator"))
        .await;
    assert!(matches!(
        result,
        Err(PaymentError::BeforeHookRejected {
            source: HookError::UnauthorizedInvoker { .. },
            ..
        })
    ));
}

#[tokio::test]
async fn test_full_lifecycle_with_fees() {
    let (builder, _clock) = builder();
    let coordinator = open_slots(builder, &[])
        .fee_bounds(FeeBounds::new(0, 500).unwrap())
        .fee_calculator(Arc::new(FlatFee(150)))
        .fee_receiver(addr("treasury"))
        .build()
        .unwrap();
    let payment = payment(1);
    let operator = addr("operator");
    let usdc = &payment.asset;

    let receipt = coordinator
        .authorize(&payment, amount(dec!(100)), &operator)
        .await
        .unwrap();
    assert_eq!(receipt.state, PaymentState::InEscrow);

    let receipt = coordinator
        .refund_in_escrow(&payment, amount(dec!(20)), &operator)
        .await
        .unwrap();
    assert_eq!(receipt.state, PaymentState::InEscrow);

    let receipt = coordinator
        .release(&payment, amount(dec!(33.33)), &operator)
        .await
        .unwrap();
    // 33.33 * 1.5% = 0.49995, truncated to four places.
    assert_eq!(receipt.fee, Balance::new(dec!(0.4999)));
    assert_eq!(receipt.state, PaymentState::InEscrow);

    let receipt = coordinator
        .release(&payment, amount(dec!(46.67)), &operator)
        .await
        .unwrap();
    assert_eq!(receipt.state, PaymentState::Released);
    assert_eq!(receipt.record.refundable, Balance::new(dec!(80)));

    let receipt = coordinator
        .refund_post_escrow(&payment, amount(dec!(30)), &operator)
        .await
        .unwrap();
    assert_eq!(receipt.state, PaymentState::Released);
    let receipt = coordinator
        .refund_post_escrow(&payment, amount(dec!(50)), &operator)
        .await
        .unwrap();
    assert_eq!(receipt.state, PaymentState::Settled);

    assert!(matches!(
        coordinator
            .refund_post_escrow(&payment, amount(dec!(0.01)), &operator)
            .await,
        Err(PaymentError::Ledger(LedgerError::RefundExceedsCaptured { .. }))
    ));

    // Fees: 0.4999 + 0.7000 (46.67 * 1.5% = 0.70005).
    assert_eq!(
        coordinator.balance(&addr("treasury"), usdc).await.unwrap(),
        Balance::new(dec!(1.1999))
    );
    // Payer: -100 + 20 refunded in escrow + 80 refunded post escrow.
    assert!(coordinator.balance(&payment.payer, usdc).await.unwrap().is_zero());
    // Receiver got 80 minus fees and returned 80.
    assert_eq!(
        coordinator.balance(&payment.receiver, usdc).await.unwrap(),
        Balance::new(dec!(-1.1999))
    );
    assert_eq!(coordinator.audit().len(), 6);
}

#[tokio::test]
async fn test_fee_outside_coordinator_bounds() {
    let (builder, _clock) = builder();
    let coordinator = open_slots(builder, &[])
        .fee_bounds(FeeBounds::new(100, 500).unwrap())
        .fee_calculator(Arc::new(TieredFee))
        .build()
        .unwrap();
    let payment = payment(1);
    let operator = addr("operator");
    coordinator
        .authorize(&payment, amount(dec!(100)), &operator)
        .await
        .unwrap();

    assert!(matches!(
        coordinator.release(&payment, amount(dec!(60)), &operator).await,
        Err(PaymentError::FeeBoundsIncompatible { fee_bps: 600, min_bps: 100, max_bps: 500 })
    ));
    let receipt = coordinator
        .release(&payment, amount(dec!(40)), &operator)
        .await
        .unwrap();
    assert_eq!(receipt.fee, Balance::new(dec!(0.6)));
}

#[tokio::test]
async fn test_payment_fee_range_must_overlap_coordinator_bounds() {
    let (builder, _clock) = builder();
    let coordinator = open_slots(builder, &[])
        .fee_bounds(FeeBounds::new(600, 800).unwrap())
        .build()
        .unwrap();

    // The payment accepts at most 500 bps.
    let result = coordinator
        .authorize(&payment(1), amount(dec!(10)), &addr("operator"))
        .await;
    assert!(matches!(
        result,
        Err(PaymentError::FeeBoundsIncompatible { min_bps: 600, max_bps: 800, .. })
    ));
}

#[tokio::test]
async fn test_fee_receiver_must_match_payment() {
    let (builder, _clock) = builder();
    let coordinator = open_slots(builder, &[])
        .fee_bounds(FeeBounds::new(0, 500).unwrap())
        .fee_calculator(Arc::new(FlatFee(100)))
        .fee_receiver(addr("treasury"))
        .build()
        .unwrap();
    let mut payment = payment(1);
    payment.fee_receiver = Some(addr("someone-else"));
    let operator = addr("operator");

    coordinator
        .authorize(&payment, amount(dec!(10)), &operator)
        .await
        .unwrap();
    assert!(matches!(
        coordinator.release(&payment, amount(dec!(10)), &operator).await,
        Err(PaymentError::Ledger(LedgerError::InvalidFeeReceiver { .. }))
    ));
}

#[tokio::test]
async fn test_expiry_driven_states_and_reclaim() {
    let (builder, clock) = builder();
    let coordinator = open_slots(builder, &[]).build().unwrap();
    let payment = payment(1);

    coordinator
        .authorize(&payment, amount(dec!(25)), &addr("operator"))
        .await
        .unwrap();
    assert!(matches!(
        coordinator.reclaim(&payment, &addr("payer")).await,
        Err(PaymentError::Ledger(LedgerError::BeforeAuthorizationExpiry(_)))
    ));

    clock.set(Timestamp(common::AUTHORIZATION_EXPIRY));
    assert_eq!(
        coordinator.payment_state(&payment).await.unwrap(),
        PaymentState::Expired
    );
    assert!(matches!(
        coordinator
            .release(&payment, amount(dec!(25)), &addr("operator"))
            .await,
        Err(PaymentError::Ledger(LedgerError::AfterAuthorizationExpiry(_)))
    ));

    let receipt = coordinator.reclaim(&payment, &addr("payer")).await.unwrap();
    assert_eq!(receipt.state, PaymentState::Settled);
    assert!(coordinator
        .balance(&payment.payer, &payment.asset)
        .await
        .unwrap()
        .is_zero());
}

#[tokio::test]
async fn test_released_payment_settles_at_refund_expiry() {
    let (builder, clock) = builder();
    let coordinator = open_slots(builder, &[]).build().unwrap();
    let payment = payment(1);
    let operator = addr("operator");

    coordinator
        .authorize(&payment, amount(dec!(25)), &operator)
        .await
        .unwrap();
    coordinator
        .release(&payment, amount(dec!(25)), &operator)
        .await
        .unwrap();
    assert_eq!(
        coordinator.payment_state(&payment).await.unwrap(),
        PaymentState::Released
    );

    clock.set(Timestamp(common::REFUND_EXPIRY));
    assert_eq!(
        coordinator.payment_state(&payment).await.unwrap(),
        PaymentState::Settled
    );
}

#[tokio::test]
async fn test_ledger_validation() {
    let (builder, _clock) = builder();
    let coordinator = open_slots(builder, &[]).build().unwrap();
    let operator = addr("operator");

    let mut foreign = payment(1);
    foreign.operator = addr("another-operator");
    assert!(matches!(
        coordinator.authorize(&foreign, amount(dec!(10)), &operator).await,
        Err(PaymentError::Ledger(LedgerError::WrongOperator { .. }))
    ));

    let payment = payment(2);
    assert!(matches!(
        coordinator.authorize(&payment, amount(dec!(100.01)), &operator).await,
        Err(PaymentError::Ledger(LedgerError::ExceedsMaxAmount { .. }))
    ));
    coordinator
        .authorize(&payment, amount(dec!(10)), &operator)
        .await
        .unwrap();
    assert!(matches!(
        coordinator.authorize(&payment, amount(dec!(10)), &operator).await,
        Err(PaymentError::Ledger(LedgerError::AlreadyCollected))
    ));
    assert!(matches!(
        coordinator.release(&payment, amount(dec!(11)), &operator).await,
        Err(PaymentError::Ledger(LedgerError::InsufficientCapturable { .. }))
    ));

    let mut unordered = payment.clone();
    unordered.salt = 3;
    unordered.refund_expiry = Timestamp(common::AUTHORIZATION_EXPIRY - 1);
    assert!(matches!(
        coordinator.authorize(&unordered, amount(dec!(1)), &operator).await,
        Err(PaymentError::Ledger(LedgerError::InvalidExpiries))
    ));
}

#[tokio::test]
async fn test_evidence_and_refund_request_queries() {
    let (builder, _clock) = builder();
    let coordinator = open_slots(builder, &[ActionSlot::RefundInEscrow])
        .slot(ActionSlot::RefundInEscrow, ActionPolicy::gate(Condition::IsArbiter))
        .arbiter(addr("arbiter"))
        .build()
        .unwrap();
    let payment = payment(1);

    assert!(coordinator.is_evidence_submitter(&payment, &addr("payer")).unwrap());
    assert!(coordinator.is_evidence_submitter(&payment, &addr("receiver")).unwrap());
    assert!(coordinator.is_evidence_submitter(&payment, &addr("arbiter")).unwrap());
    assert!(!coordinator.is_evidence_submitter(&payment, &addr("stranger")).unwrap());

    assert!(coordinator.can_act(ActionSlot::RefundInEscrow, &payment, &addr("arbiter")).unwrap());
    assert!(!coordinator.can_act(ActionSlot::RefundInEscrow, &payment, &addr("payer")).unwrap());
    assert!(matches!(
        coordinator.ensure_payer_or_arbiter(&payment, &Address::new("receiver")),
        Err(PaymentError::NotPayerOrArbiter)
    ));
}

#[tokio::test]
async fn test_fee_overflow_leaves_payment_in_escrow() {
    let (builder, _clock) = builder();
    let coordinator = open_slots(builder, &[])
        .fee_bounds(FeeBounds::new(0, 500).unwrap())
        .fee_calculator(Arc::new(FlatFee(100)))
        .build()
        .unwrap();
    let mut payment = payment(1);
    payment.max_amount = amount(rust_decimal::Decimal::MAX);
    let operator = addr("operator");

    coordinator
        .authorize(&payment, amount(rust_decimal::Decimal::MAX), &operator)
        .await
        .unwrap();
    assert!(matches!(
        coordinator
            .release(&payment, amount(rust_decimal::Decimal::MAX), &operator)
            .await,
        Err(PaymentError::Ledger(LedgerError::Overflow))
    ));

    let record = coordinator.record(&payment.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(record.capturable, Balance::new(rust_decimal::Decimal::MAX));
    assert!(record.refundable.is_zero());
    assert!(coordinator
        .balance(&payment.receiver, &payment.asset)
        .await
        .unwrap()
        .is_zero());
    assert_eq!(coordinator.audit().len(), 1);
}

#[tokio::test]
async fn test_position_overflow_rejects_the_transition() {
    let (builder, _clock) = builder();
    let coordinator = open_slots(builder, &[]).build().unwrap();
    let operator = addr("operator");
    let max = rust_decimal::Decimal::MAX;

    let mut first = payment(1);
    first.max_amount = amount(max);
    let mut second = payment(2);
    second.max_amount = amount(max);

    coordinator
        .authorize(&first, amount(max), &operator)
        .await
        .unwrap();
    assert!(matches!(
        coordinator.authorize(&second, amount(max), &operator).await,
        Err(PaymentError::Ledger(LedgerError::Overflow))
    ));

    assert_eq!(
        coordinator.payment_state(&second).await.unwrap(),
        PaymentState::NonExistent
    );
    assert_eq!(
        coordinator.balance(&first.payer, &first.asset).await.unwrap(),
        -Balance::new(max)
    );
}
