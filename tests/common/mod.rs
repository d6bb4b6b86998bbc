#![allow(dead_code)]

use escrow_policy::application::coordinator::{ActionPolicy, CoordinatorBuilder, EscrowCoordinator};
use escrow_policy::domain::action::ActionSlot;
use escrow_policy::domain::amount::Amount;
use escrow_policy::domain::ids::{Address, AssetId, Timestamp};
use escrow_policy::domain::payment::PaymentInfo;
use escrow_policy::infrastructure::clock::ManualClock;
use escrow_policy::infrastructure::in_memory::InMemoryLedgerStore;
use escrow_policy::policy::condition::Condition;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

pub const PRE_APPROVAL_EXPIRY: u64 = 1_000;
pub const AUTHORIZATION_EXPIRY: u64 = 2_000;
pub const REFUND_EXPIRY: u64 = 3_000;

pub fn addr(id: &str) -> Address {
    Address::new(id)
}

pub fn amount(value: rust_decimal::Decimal) -> Amount {
    Amount::new(value).unwrap()
}

/// A 100 USDC payment from `payer` to `receiver` operated by `operator`,
/// accepting fees up to 5%.
pub fn payment(salt: u64) -> PaymentInfo {
    PaymentInfo {
        operator: addr("operator"),
        payer: addr("payer"),
        receiver: addr("receiver"),
        asset: AssetId::new("USDC"),
        max_amount: amount(dec!(100)),
        pre_approval_expiry: Timestamp(PRE_APPROVAL_EXPIRY),
        authorization_expiry: Timestamp(AUTHORIZATION_EXPIRY),
        refund_expiry: Timestamp(REFUND_EXPIRY),
        min_fee_bps: 0,
        max_fee_bps: 500,
        fee_receiver: None,
        salt,
    }
}

/// Builder for a coordinator named `operator` over an in-memory ledger,
/// plus the clock driving it.
pub fn builder() -> (CoordinatorBuilder, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Timestamp(10)));
    let builder = EscrowCoordinator::builder(
        addr("operator"),
        Box::new(InMemoryLedgerStore::new()),
        clock.clone(),
    );
    (builder, clock)
}

/// Binds `ActionPolicy::gate(AlwaysTrue)` to every slot not set yet.
pub fn open_slots(mut builder: CoordinatorBuilder, except: &[ActionSlot]) -> CoordinatorBuilder {
    for slot in ActionSlot::ALL {
        if !except.contains(&slot) {
            builder = builder.slot(slot, ActionPolicy::gate(Condition::AlwaysTrue));
        }
    }
    builder
}

pub fn payment_json(salt: u64) -> Value {
    json!({
        "operator": "operator",
        "payer": "payer",
        "receiver": "receiver",
        "asset": "USDC",
        "max_amount": "100",
        "pre_approval_expiry": PRE_APPROVAL_EXPIRY,
        "authorization_expiry": AUTHORIZATION_EXPIRY,
        "refund_expiry": REFUND_EXPIRY,
        "min_fee_bps": 0,
        "max_fee_bps": 500,
        "salt": salt
    })
}

/// Scenario with `payments` payments named `p1..pN`. With `escrow` the
/// coordinator is freeze-aware with a 100 second escrow period.
pub fn scenario_json(payments: usize, escrow: bool) -> Value {
    let named: serde_json::Map<String, Value> = (1..=payments)
        .map(|i| (format!("p{i}"), payment_json(i as u64)))
        .collect();
    let mut scenario = json!({
        "coordinator": "operator",
        "arbiter": "arbiter",
        "fee": { "min_bps": 0, "max_bps": 500, "flat_bps": 100 },
        "fee_receiver": "treasury",
        "slots": {
            "authorize": { "condition": "always_true", "recorders": ["payment_index"] },
            "release": { "condition": { "or": ["receiver", "payer"] }, "notify": true },
            "refund_in_escrow": { "condition": { "or": ["receiver", "arbiter"] } },
            "refund_post_escrow": { "condition": "receiver" }
        },
        "payments": named
    });
    if escrow {
        scenario["escrow"] = json!({
            "period": 100,
            "freeze": { "freeze": "payer", "unfreeze": { "or": ["payer", "arbiter"] } }
        });
    }
    scenario
}

pub fn write_scenario(path: &Path, scenario: &Value) -> Result<(), Error> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, scenario)?;
    Ok(())
}

/// Writes a command stream authorizing every payment `p1..pN`, then
/// releasing half of it after the escrow period.
pub fn generate_commands(path: &Path, payments: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["op", "payment", "caller", "amount", "at"])?;

    for i in 1..=payments {
        wtr.write_record(["authorize", &format!("p{i}"), "operator", "10", "10"])?;
    }
    for i in 1..=payments {
        wtr.write_record(["release", &format!("p{i}"), "receiver", "5", "500"])?;
    }

    wtr.flush()?;
    Ok(())
}
