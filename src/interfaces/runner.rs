use super::config::Scenario;
use super::csv::command_reader::{Command, CommandOp};
use super::csv::state_writer::PaymentRow;
use crate::domain::amount::Amount;
use crate::domain::ids::Timestamp;
use crate::domain::payment::{PaymentInfo, PaymentState};
use crate::domain::ports::Clock;
use crate::error::{PaymentError, Result};
use crate::infrastructure::clock::ManualClock;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Replays a command stream against a scenario.
pub struct ScenarioRunner {
    scenario: Scenario,
    clock: Arc<ManualClock>,
}

impl ScenarioRunner {
    /// `clock` must be the clock the scenario's coordinator was built with.
    pub fn new(scenario: Scenario, clock: Arc<ManualClock>) -> Self {
        Self { scenario, clock }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub async fn apply(&self, command: Command) -> Result<()> {
        if let Some(at) = command.at {
            self.clock.set(Timestamp(at));
        }
        let payment = self.payment(&command.payment)?;
        let coordinator = &self.scenario.coordinator;
        let caller = &command.caller;

        match command.op {
            CommandOp::Authorize => {
                let amount = required(command.amount, command.op)?;
                coordinator.authorize(payment, amount, caller).await?;
            }
            CommandOp::Release => {
                let amount = required(command.amount, command.op)?;
                coordinator.release(payment, amount, caller).await?;
            }
            CommandOp::RefundInEscrow => {
                let amount = required(command.amount, command.op)?;
                coordinator.refund_in_escrow(payment, amount, caller).await?;
            }
            CommandOp::Void => {
                coordinator.void(payment, caller).await?;
            }
            CommandOp::Reclaim => {
                coordinator.reclaim(payment, caller).await?;
            }
            CommandOp::RefundPostEscrow => {
                let amount = required(command.amount, command.op)?;
                coordinator.refund_post_escrow(payment, amount, caller).await?;
            }
            CommandOp::Freeze => {
                coordinator.freeze(payment, caller).await?;
            }
            CommandOp::Unfreeze => {
                coordinator.unfreeze(payment, caller).await?;
            }
        }
        Ok(())
    }

    /// Current state of every named payment, in name order.
    pub async fn rows(&self) -> Result<Vec<PaymentRow>> {
        let coordinator = &self.scenario.coordinator;
        let now = self.clock.now();
        let mut rows = Vec::with_capacity(self.scenario.payments.len());
        for (name, payment) in &self.scenario.payments {
            let payment_id = payment.id()?;
            let record = coordinator.record(&payment_id).await?;
            let state = PaymentState::derive(record.as_ref(), payment, now);
            let (capturable, refundable) = record
                .map(|r| (r.capturable, r.refundable))
                .unwrap_or_default();
            rows.push(PaymentRow {
                payment: name.clone(),
                state,
                capturable,
                refundable,
                frozen: coordinator.is_frozen(&payment_id),
            });
        }
        Ok(rows)
    }

    fn payment(&self, name: &str) -> Result<&PaymentInfo> {
        self.scenario
            .payments
            .get(name)
            .ok_or_else(|| PaymentError::ValidationError(format!("unknown payment \"{name}\"")))
    }
}

fn required(amount: Option<Decimal>, op: CommandOp) -> Result<Amount> {
    let amount = amount
        .ok_or_else(|| PaymentError::ValidationError(format!("{op:?} requires an amount")))?;
    Amount::new(amount)
}
