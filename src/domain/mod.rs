//! Domain layer: identifiers, monetary values, payment descriptions, the
//! ledger bookkeeping record, per-payment freeze state and the ports the application depends on.

pub mod action;
pub mod amount;
pub mod freeze;
pub mod ids;
pub mod payment;
pub mod ports;
